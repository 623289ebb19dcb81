pub mod calls;
pub mod conversations;
pub mod notifications;

use actix_web::HttpResponse;
use serde::Serialize;

pub fn ok_json<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "data": data,
    }))
}
