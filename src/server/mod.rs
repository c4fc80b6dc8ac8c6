//! HTTP surface: health probe, model listing, and the OpenAI-compatible
//! chat-completions endpoint.

use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::api::{translate, ChatCompletionRequest};
use crate::core::error::GatewayError;
use crate::core::gateway::{model_listing, Gateway};

#[get("/")]
pub async fn health(_req: HttpRequest, _: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[get("/v1/models")]
pub async fn models(req: HttpRequest, gateway: web::Data<Gateway>) -> HttpResponse {
    if let Err(denied) = check_api_key(&req, gateway.server_config().api_keys.as_slice()) {
        return denied;
    }
    HttpResponse::Ok().json(model_listing(&gateway))
}

#[post("/v1/chat/completions")]
pub async fn chat_completions(
    req: HttpRequest,
    body: web::Json<ChatCompletionRequest>,
    gateway: web::Data<Gateway>,
) -> HttpResponse {
    if let Err(denied) = check_api_key(&req, gateway.server_config().api_keys.as_slice()) {
        return denied;
    }

    let ChatCompletionRequest {
        model,
        messages,
        stream,
    } = body.into_inner();

    let events = match gateway.chat_stream(&model, messages).await {
        Ok(events) => events,
        Err(err) => return error_response(&err),
    };

    if stream {
        let frames = translate::sse_stream(events, model)
            .map(Ok::<_, std::convert::Infallible>);
        HttpResponse::Ok()
            .content_type("text/event-stream; charset=utf-8")
            .insert_header(("Cache-Control", "no-cache"))
            .streaming(frames)
    } else {
        match translate::collect_completion(events, &model).await {
            Ok(completion) => HttpResponse::Ok().json(completion),
            Err(err) => error_response(&err),
        }
    }
}

/// Key may arrive as a bearer token or in `x-api-key`/`api-key` headers.
/// Missing keys are a 400, unknown keys a 403; an empty configured list
/// disables the check.
fn check_api_key(req: &HttpRequest, api_keys: &[String]) -> Result<(), HttpResponse> {
    if api_keys.is_empty() {
        return Ok(());
    }

    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let presented = header("authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string))
        .or_else(|| header("x-api-key"))
        .or_else(|| header("api-key"));

    match presented {
        None => Err(HttpResponse::BadRequest()
            .body("Missing api-key, x-api-key, or authorization header")),
        Some(key) if !api_keys.contains(&key) => {
            Err(HttpResponse::Forbidden().body("Invalid API key"))
        }
        Some(_) => Ok(()),
    }
}

fn error_response(err: &GatewayError) -> HttpResponse {
    let body = json!({"error": {"message": err.to_string()}});
    match err.http_status() {
        400 => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub async fn serve(gateway: Gateway) -> std::io::Result<()> {
    let host = gateway.server_config().host.clone();
    let port = gateway.server_config().port;
    if gateway.server_config().api_keys.is_empty() {
        warn!("No API keys configured; the endpoint is unauthenticated");
    }

    let data = web::Data::new(gateway);
    info!("Completions endpoint: http://{}:{}/v1/chat/completions", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(health)
            .service(models)
            .service(chat_completions)
    })
    .bind((host, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GatewayConfig;
    use crate::tools::ToolRegistry;
    use actix_web::{body::to_bytes, test};

    fn sample_gateway(api_keys: &str) -> Gateway {
        let config: GatewayConfig = toml::from_str(&format!(
            r#"
[server]
api_keys = [{api_keys}]

[providers.openai]
kind = "openai"
api_key = "sk-test"

[agents."gpt-x"]
provider = "openai"
model = "gpt-4o"
"#
        ))
        .unwrap();
        Gateway::new(config, ToolRegistry::new())
    }

    macro_rules! spawn_app {
        ($gateway:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($gateway))
                    .service(health)
                    .service(models)
                    .service(chat_completions),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn health_answers_ok() {
        let app = spawn_app!(sample_gateway(""));
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn models_lists_configured_agents() {
        let app = spawn_app!(sample_gateway(""));
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/models").to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        let body = to_bytes(resp.into_body()).await.unwrap();
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing["data"][0]["id"], json!("gpt-x"));
    }

    #[actix_web::test]
    async fn missing_api_key_is_bad_request() {
        let app = spawn_app!(sample_gateway("\"secret\""));
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/models").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn wrong_api_key_is_forbidden() {
        let app = spawn_app!(sample_gateway("\"secret\""));
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/v1/models")
                .insert_header(("x-api-key", "wrong"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn bearer_key_is_accepted() {
        let app = spawn_app!(sample_gateway("\"secret\""));
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/v1/models")
                .insert_header(("authorization", "Bearer secret"))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn unknown_model_yields_400_without_upstream_calls() {
        let app = spawn_app!(sample_gateway(""));
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/v1/chat/completions")
                .set_json(json!({
                    "model": "not-configured",
                    "messages": [{"role": "user", "content": "2+2?"}],
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not-configured"));
    }
}
