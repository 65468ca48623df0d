pub mod defaults;
pub mod service;
pub mod validation;

pub use defaults::{
    CommunitySettings, FusionSettings, GroundingSettings, QuerySettings, RagConfig,
    RateLimitSettings, RerankSettings, RetrievalSettings, TimeoutSettings,
};
pub use service::{load_config_from, ConfigService};
