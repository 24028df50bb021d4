pub mod config;
pub mod error;
pub mod image;
pub mod invoke;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod vendors;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use image::{HttpImageFetcher, ImageFetcher};
pub use invoke::{BedrockInvoker, Invoker, VendorStreamEvent};
pub use logging::SharedLogger;
pub use proxy::Upstream;
pub use server::{build_router, AppState};
pub use vendors::{Registry, Vendor};
