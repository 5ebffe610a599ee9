//! tokenwarden - resilient authenticated request runtime
//!
//! Attaches bearer credentials to outgoing calls, refreshes an expired
//! credential exactly once under concurrent load, and classifies and
//! recovers from runtime failures without ending the session.
//!
//! ```no_run
//! use tokenwarden::{RequestRuntime, RuntimeConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = RequestRuntime::builder(RuntimeConfig::load(None)?).build()?;
//! runtime.login("ada@example.com", "hunter2").await?;
//! let response = runtime.get("/api/data").await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod notification;
pub mod recovery;
pub mod reporter;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod transport;

pub use auth::{RefreshCoordinator, RefreshPhase, Registration};
pub use error::{classify, ClassifiedFailure, FailureEvent, FailureKind, ScriptFault, Severity};
pub use events::{EventBus, RuntimeEvent};
pub use gateway::{GatewayError, RequestGateway, RequestOptions};
pub use ledger::{ErrorLedger, LedgerStats};
pub use notification::{Notice, NoticeAction, NoticeLevel};
pub use recovery::{RecoveryAction, RecoveryEngine, RecoveryPolicy};
pub use reporter::{ErrorReport, FailureReporter};
pub use runtime::{RequestRuntime, RuntimeBuilder, RuntimeError};
pub use session::{Credential, FileStore, KeyValueStore, MemoryStore};
pub use settings::RuntimeConfig;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
