#[derive(Clone)]
pub struct AppState {
    pub env_name: String,
    pub base_url: String,
}
