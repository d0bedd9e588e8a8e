#![forbid(unsafe_code)]
#![allow(clippy::all)]

mod admin;
mod db;
mod entities;
mod posts;
mod session;
mod settings;
mod tui;
mod user_manager;
mod web;

use db::connect;
use posts::PostManager;
use session::SessionBackendStorage;
use settings::{parse_env, Command};
use sha2::Sha512;
use tui::{maybe_show_qr_code, get_password};
use user_manager::UserManager;
use color_eyre::eyre::{Result, Context};
use web::WebServer;
use sha2::Digest;

#[tokio::main]
async fn main() -> Result<()>
{
  let (session_config, host_config, behaviour_config, command, _guards) = parse_env()?;

  let db = connect(&host_config.database_url).await?;

  // one configured secret; its SHA-512 digest peppers password hashes
  // and signs session cookies
  let mut hasher = Sha512::new();
  hasher.update(host_config.secret_key()?.as_bytes());
  let secret = hasher.finalize().to_vec();
  let users = UserManager::new(db.1.clone(), host_config.domain.clone(), secret.clone()).wrap_err("failed to initialize user manager")?;

  match command
  {
    Command::Run =>
    {
      let site = host_config.site.clone().unwrap_or_else(|| host_config.domain.clone());
      WebServer::new(users, PostManager::new(db.1.clone()), behaviour_config, session_config.session_timeout_seconds, site)
        .run(SessionBackendStorage::from_settings(session_config, db.0, &secret, host_config.domain)?, host_config.bind, host_config.tls).await?;
    },
    Command::AddUser(args) =>
    {
      let username = args.username.clone();
      users.register(args.username, get_password()?).await.wrap_err("failed to create new user")?;
      println!("User {username} created; MFA enrollment happens at first login");
    },
    Command::DeleteUser(args) => users.delete(args.username).await.wrap_err("failed to delete user")?,
    Command::ResetPassword(args) => users.reset_password(args.username, get_password()?).await.wrap_err("failed to reset password")?,
    Command::ResetMfa(args) => maybe_show_qr_code(users.reset_mfa(args.username).await.wrap_err("failed to reset MFA token")?, args.show_qr_code)?
  }

  Ok(())
}
