//! Client session: operation buffering, grouped flush, error
//! collection.

pub mod errors;
pub mod op;
pub mod session;

pub use errors::{CollectedError, ErrorCollector, DEFAULT_MAX_ERRORS};
pub use op::{OpPayload, OpState, SessionOp};
pub use session::{FlushMode, OpOutcome, Session, TabletServer, DEFAULT_BUFFER_BYTES};
