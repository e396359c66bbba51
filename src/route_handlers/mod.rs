pub mod api_data;
pub mod health;
pub mod home;
pub mod html_template;
pub mod not_found;
pub mod storage_guard;
pub mod webhooks;
