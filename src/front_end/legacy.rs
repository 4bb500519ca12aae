//! Constant responses for the retired two-phase-commit phases.
//!
//! Clients written against the multi-phase protocol still call these routes.
//! Each stub only checks the transaction id header and acknowledges; nothing
//! here touches the budget backend.

use axum::http::{HeaderName, HeaderValue};

use super::FrontEndError;
use super::context::extract_transaction_id;
use super::exchange::{AsyncExchange, HttpResponse};

pub const LAST_EXECUTION_TIMESTAMP_HEADER: &str = "x-gscp-transaction-last-execution-timestamp";
/// Placeholder for the optimistic-concurrency timestamp old clients expect.
/// It carries no meaning.
pub const FAKE_LAST_EXECUTION_TIMESTAMP: &str = "1234";

/// Sets the legacy timestamp header, replacing any previous value.
pub fn insert_backward_compatible_headers(response: &mut HttpResponse) {
    response.headers.insert(
        HeaderName::from_static(LAST_EXECUTION_TIMESTAMP_HEADER),
        HeaderValue::from_static(FAKE_LAST_EXECUTION_TIMESTAMP),
    );
}

/// Also serves the health-check route.
pub fn begin_transaction(exchange: AsyncExchange) -> Result<(), FrontEndError> {
    acknowledge("begin", exchange)
}

#[deprecated(note = "kept until clients stop calling the two-phase-commit routes")]
pub fn commit_transaction(exchange: AsyncExchange) -> Result<(), FrontEndError> {
    acknowledge("commit", exchange)
}

#[deprecated(note = "kept until clients stop calling the two-phase-commit routes")]
pub fn notify_transaction(exchange: AsyncExchange) -> Result<(), FrontEndError> {
    acknowledge("notify", exchange)
}

#[deprecated(note = "kept until clients stop calling the two-phase-commit routes")]
pub fn abort_transaction(exchange: AsyncExchange) -> Result<(), FrontEndError> {
    acknowledge("abort", exchange)
}

#[deprecated(note = "kept until clients stop calling the two-phase-commit routes")]
pub fn end_transaction(exchange: AsyncExchange) -> Result<(), FrontEndError> {
    acknowledge("end", exchange)
}

/// Always `NotFound`; the route only stays addressable.
#[deprecated(note = "kept until clients stop calling the two-phase-commit routes")]
pub fn get_transaction_status(_exchange: AsyncExchange) -> Result<(), FrontEndError> {
    tracing::debug!("start get transaction status");
    Err(FrontEndError::NotFound)
}

fn acknowledge(phase: &'static str, mut exchange: AsyncExchange) -> Result<(), FrontEndError> {
    tracing::debug!(phase, "start legacy transaction phase");
    let transaction_id = extract_transaction_id(exchange.request())?;
    tracing::debug!(phase, %transaction_id, "acknowledged legacy transaction phase");

    insert_backward_compatible_headers(exchange.response_mut());
    exchange.finish(Ok(()));
    Ok(())
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::front_end::context::TRANSACTION_ID_HEADER;
    use crate::front_end::exchange::{ExchangeCompletion, HttpRequest};

    const TXN: &str = "3e9b2c1a-5a4f-4f43-9d43-0b4c3a2e8f11";

    fn exchange(with_id: bool) -> (AsyncExchange, ExchangeCompletion) {
        let mut request = HttpRequest::new(Method::POST, "/v1/transactions:commit");
        if with_id {
            request = request.with_header(TRANSACTION_ID_HEADER, TXN);
        }
        AsyncExchange::new(request)
    }

    #[test]
    fn header_injection_overwrites() {
        let mut response = HttpResponse::default();
        insert_backward_compatible_headers(&mut response);
        insert_backward_compatible_headers(&mut response);
        let values: Vec<_> = response
            .headers
            .get_all(LAST_EXECUTION_TIMESTAMP_HEADER)
            .iter()
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], FAKE_LAST_EXECUTION_TIMESTAMP);
    }

    #[tokio::test]
    async fn stubs_acknowledge_with_compat_header() {
        let stubs: [fn(AsyncExchange) -> Result<(), FrontEndError>; 5] = [
            begin_transaction,
            commit_transaction,
            notify_transaction,
            abort_transaction,
            end_transaction,
        ];
        for stub in stubs {
            let (exchange, completion) = exchange(true);
            stub(exchange).expect("acknowledged");
            let outcome = completion.wait().await.expect("finished");
            assert!(outcome.result.is_ok());
            let headers = &outcome.response.headers;
            assert_eq!(
                headers.get(LAST_EXECUTION_TIMESTAMP_HEADER).unwrap(),
                FAKE_LAST_EXECUTION_TIMESTAMP
            );
        }
    }

    #[tokio::test]
    async fn stubs_reject_missing_transaction_id_without_finishing() {
        let (exchange, completion) = exchange(false);
        let err = begin_transaction(exchange).unwrap_err();
        assert!(matches!(err, FrontEndError::InvalidRequest { .. }));
        assert!(completion.wait().await.is_none());
    }

    #[tokio::test]
    async fn status_is_always_not_found() {
        let (exchange, completion) = exchange(true);
        assert_eq!(
            get_transaction_status(exchange),
            Err(FrontEndError::NotFound)
        );
        assert!(completion.wait().await.is_none());
    }
}
