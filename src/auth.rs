use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Every shop on a server shares one password; the database name only picks the shop.
#[derive(Debug)]
pub struct ShopAuthSource {
    password: String,
}

impl ShopAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ShopAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!("password login for user {:?} on shop {:?}", login.user(), login.database());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
