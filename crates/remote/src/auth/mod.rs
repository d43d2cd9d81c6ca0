mod jwt;
mod middleware;

pub use jwt::{ACCESS_TOKEN_TTL_SECS, JwtError, JwtIdentity, JwtService};
pub use middleware::{API_KEY_HEADER, RequestContext, require_api_key, require_session};
