use crate::models::responses::ApiResponse;
use crate::services::callbacks::CallbackVerifier;
use crate::services::legacy::ipn::{confirm_received, validate_received, IpnPost};
use crate::services::legacy::LegacyContext;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use log::{error, info, warn};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BackQuery {
    #[serde(default)]
    pub r: String,
    #[serde(default)]
    pub s: String,
}

fn request_headers(request: &HttpRequest) -> Vec<(String, String)> {
    request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn rejected(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message),
    })
}

pub async fn ipn(
    verifier: web::Data<CallbackVerifier>,
    request: HttpRequest,
    body: String,
) -> ActixResult<HttpResponse> {
    info!("Received IPN");

    let result = verifier.check_ipn_headers(&body, &request_headers(&request));
    if !result.verified {
        warn!("IPN rejected: {}", result.errors.join("; "));
        return Ok(rejected(result.errors.join("; ")));
    }

    let (headers, content) = verifier.ipn_confirm_response(&result);
    let mut response = HttpResponse::Ok();
    for (name, value) in headers {
        response.insert_header((name, value));
    }
    info!("IPN confirmed");
    Ok(response.body(content))
}

pub async fn back(
    verifier: web::Data<CallbackVerifier>,
    query: web::Query<BackQuery>,
) -> ActixResult<HttpResponse> {
    info!("Received Back redirect");

    let result = verifier.check_back(&query.r, &query.s);
    if !result.verified {
        warn!("Back redirect not verified: {}", result.errors.join("; "));
    }
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(verifier.back_notification(&result)))
}

pub async fn legacy_ipn(
    verifier: web::Data<CallbackVerifier>,
    body: String,
) -> ActixResult<HttpResponse> {
    info!("Received legacy IPN");

    let post = IpnPost::parse(&body);
    let Some(currency) = post.first("CURRENCY") else {
        return Ok(rejected("Missing CURRENCY".to_string()));
    };
    let ctx = match LegacyContext::new(verifier.config(), currency) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error processing legacy IPN: {}", e);
            return Ok(rejected(e.to_string()));
        }
    };

    let result = validate_received(&ctx, &post);
    if !result.valid {
        warn!("Legacy IPN rejected: {}", result.errors.join("; "));
        return Ok(rejected(result.errors.join("; ")));
    }
    match confirm_received(&ctx, &post) {
        Ok(confirmation) => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(confirmation)),
        Err(e) => {
            error!("Error confirming legacy IPN: {}", e);
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(e.to_string()),
            }))
        }
    }
}

/// Mounts the callback routes under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/ipn", web::post().to(ipn))
            .route("/back", web::get().to(back))
            .route("/legacy/ipn", web::post().to(legacy_ipn)),
    );
}
