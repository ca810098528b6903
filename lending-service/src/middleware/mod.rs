pub mod caller_id;

pub use caller_id::{CallerId, CALLER_ID_HEADER};
