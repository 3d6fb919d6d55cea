//! Exchange gateway contract and adapters.
//!
//! # Key Components
//!
//! - [`ExchangeGateway`]: The only surface the controller uses to reach an exchange
//! - [`OrderRequest`]: Validated order built with [`OrderRequest::builder`]
//! - [`PaperGateway`]: In-memory account with failure injection
//! - [`BybitGateway`]: Signed v5 REST adapter with bounded retry
//! - [`RetryPolicy`]: Exponential backoff on 429/408/5xx/transport errors
//! - [`NewsSource`]: Macro calendar feed for the news gate

pub mod bybit;
pub mod error;
pub mod gateway;
pub mod news;
pub mod paper;
pub mod retry;

pub use bybit::{BybitConfig, BybitCredentials, BybitGateway};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{
    BoxFuture, DynGateway, ExchangeGateway, OrderAck, OrderRequest, OrderRequestBuilder,
    StopLossRequest, TriggerType,
};
pub use news::{CalendarFileSource, DynNewsSource, NewsSource, StaticNewsSource};
pub use paper::{FillMode, PaperGateway, PaperOp, PaperStop};
pub use retry::RetryPolicy;
