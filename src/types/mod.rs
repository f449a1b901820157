//! Request and response types of the HTTP API

pub mod request;
pub mod response;

pub use request::{
    AdvancedAnomalyRequest, AnomalyRequest, ForecastRequest, MaintenanceRequest, ScheduleRequest,
};
pub use response::{
    AdvancedAnomalyResponse, AnomalyResponse, ClearResponse, ErrorResponse, ForecastResponse,
    HealthResponse, MaintenanceResponse, MetricsResponse, ModelsResponse, ScheduleResponse,
};
