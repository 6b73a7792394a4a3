use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Counts every request and records per-endpoint duration and errors.
///
/// Endpoints are keyed by route pattern ("POST /api/v1/engines/{kind}/load"),
/// so path parameters do not fan out into separate entries. Unmatched paths
/// fall back to the raw path.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        if let Some(app_state) = req.app_data::<web::Data<AppState>>() {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration = start_time.elapsed();
            let duration_ms = duration.as_millis() as u64;

            let is_error = match &result {
                Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
                Err(_) => true,
            };

            if let Ok(response) = &result {
                let request = response.request();
                if let Some(app_state) = request.app_data::<web::Data<AppState>>() {
                    let pattern = request.match_pattern().unwrap_or(path);
                    let endpoint = format!("{} {}", method, pattern);
                    app_state.record_endpoint_request(&endpoint, duration_ms, is_error);

                    if is_error {
                        app_state.increment_error_count();
                    }
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::mock::registry_with;
    use actix_web::test as actix_test;
    use actix_web::{App, HttpResponse};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_endpoints_keyed_by_route_pattern() {
        let state = web::Data::new(AppState::with_registry(
            AppConfig::default(),
            Arc::new(registry_with(None, None)),
        ));
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(MetricsMiddleware)
                .route(
                    "/engines/{kind}/load",
                    web::post().to(|| async { HttpResponse::ServiceUnavailable().finish() }),
                ),
        )
        .await;

        for kind in ["primary", "secondary"] {
            let req = actix_test::TestRequest::post()
                .uri(&format!("/engines/{}/load", kind))
                .to_request();
            actix_test::call_service(&app, req).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 2);
        let endpoint = &metrics.endpoint_metrics["POST /engines/{kind}/load"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.error_rate(), 1.0);
    }
}
