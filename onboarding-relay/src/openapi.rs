//! OpenAPI documentation of the relay's HTTP surface, served at `/openapi.json`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Onboarding relay",
        description = "Relays multipart onboarding submissions to a workflow webhook or by email."
    ),
    paths(api::handlers::upload::upload, api::handlers::upload::preflight),
    components(schemas(api::models::upload::LivenessResponse)),
    tags((name = "upload", description = "Onboarding form submission"))
)]
pub struct ApiDoc;
