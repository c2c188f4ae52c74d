//! Paths of the brain's HTTP API, relative to the brain URL.

pub const REGISTER_SDK_ADAPTER: &str = "/v1/api/registerSdkAdapter";
pub const UNREGISTER_SDK_ADAPTER: &str = "/v1/api/unregisterSdkAdapter";
pub const NOTIFICATIONS: &str = "/v1/notifications";
pub const PROJECTS_HOME: &str = "/v1/projects/home";
pub const RECIPES: &str = "/v1/projects/home/recipes";
pub const SYSTEM_INFO: &str = "/v1/systeminfo";
pub const IDENTIFY_BRAIN: &str = "/v1/systeminfo/identbrain";
pub const GET_LOG: &str = "/v1/systeminfo/getlog";
