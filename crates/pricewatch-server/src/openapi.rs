use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pricewatch API",
        version = "0.1.0",
        description = "Scrape-job dispatch and load balancing across scraper engines."
    ),
    paths(
        crate::routes::track_product,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::cancel_job,
        crate::routes::report_completion,
        crate::routes::list_engines,
        crate::routes::register_engine,
        crate::routes::set_engine_active,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::TrackProductRequest,
        crate::dto::TrackResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::OutcomeKind,
        crate::dto::CompletionRequest,
        crate::dto::CompletionAccepted,
        crate::dto::EngineResponse,
        crate::dto::EngineListResponse,
        crate::dto::RegisterEngineBody,
        crate::dto::SetActiveRequest,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "products", description = "Product tracking entry point"),
        (name = "jobs", description = "Scrape job inspection, cancellation and completion reports"),
        (name = "engines", description = "Scraper engine registry and health flags"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
