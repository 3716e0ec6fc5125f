pub mod api;

use crate::cli::ServeArgs;
use std::error::Error;

pub struct Server {
    args: ServeArgs,
}

impl Server {
    pub fn new(args: ServeArgs) -> Self {
        Self { args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.args).await
    }
}
