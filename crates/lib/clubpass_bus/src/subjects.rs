//! Well-known bus subjects.

/// Subject the bus server sends authorization callouts to.
pub const AUTH_CALLOUT_SUBJECT: &str = "$SYS.REQ.USER.AUTH";

/// Magic-link requests from the chat integration.
pub const MAGIC_LINK_REQUEST_SUBJECT: &str = "auth.magic_link.request.v1";

/// Magic-link responses, correlated by `correlation_id`.
pub const MAGIC_LINK_RESPONSE_SUBJECT: &str = "auth.magic_link.response.v1";

/// Queue group spreading magic-link requests across instances. Callouts are
/// never queued: every instance answers every callout.
pub const MAGIC_LINK_QUEUE_GROUP: &str = "clubpass-auth";
