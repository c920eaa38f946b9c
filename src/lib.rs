pub mod auth;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod model;
pub mod registry;
pub mod response;

pub use auth::{AuthSession, ClientInfo, MemorySessionStore, RedisSessionStore, SessionStore, TokenManager};
pub use dispatch::{Outcome, RequestContext, ResponseSlot};
pub use endpoint::{Action, ConfigError, Endpoint, ParamKind, Verb};
pub use error::{codes, ApiError, ErrorKind};
pub use filter::{EntityFilter, FieldSpec, FilterOp, ListFilter, QueryOptions, SortDirection};
pub use model::{MemoryModel, Model, ModelError, ResultSet};
pub use registry::{AppState, Registry};
pub use response::Format;
