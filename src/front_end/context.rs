use uuid::Uuid;

use super::FrontEndError;
use super::exchange::HttpRequest;

pub const TRANSACTION_ID_HEADER: &str = "x-gscp-transaction-id";
pub const TRANSACTION_ORIGIN_HEADER: &str = "x-gscp-transaction-origin";
pub const CLAIMED_IDENTITY_HEADER: &str = "x-gscp-claimed-identity";
pub const USER_AGENT_HEADER: &str = "user-agent";

/// Validates the transaction id header every phase still requires.
///
/// The id does not address anything in the backend; it is only logged. Failing
/// here keeps the old client contract enforced on every route and surfaces
/// header problems on the first call a client makes.
pub fn extract_transaction_id(request: &HttpRequest) -> Result<Uuid, FrontEndError> {
    let raw = request
        .header(TRANSACTION_ID_HEADER)
        .ok_or_else(|| FrontEndError::invalid_request("missing transaction id header"))?;
    Uuid::parse_str(raw).map_err(|err| {
        FrontEndError::invalid_request(format!("malformed transaction id header: {err}"))
    })
}

/// Domain the transaction runs on behalf of.
///
/// A peer coordinator resolving a transaction for a client names the client in
/// the origin header; otherwise the caller's authorized domain is used. Neither
/// being present yields an empty origin, which body parsing may reject.
pub fn obtain_transaction_origin(request: &HttpRequest) -> String {
    if let Some(origin) = request.header(TRANSACTION_ORIGIN_HEADER) {
        return origin.to_string();
    }
    request
        .auth_context
        .authorized_domain
        .clone()
        .unwrap_or_default()
}
