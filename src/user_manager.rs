/*
scriv: self-hosted blog daemon
Copyright (C) 2025 Joe Dillon

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::time::{SystemTime, UNIX_EPOCH};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordVerifier};
use argon2::PasswordHasher;
use askama::filters::urlencode;
use base32::Alphabet;
use qrcode::{render::{svg, unicode}, types::QrError, QrCode};
use rand::thread_rng;
use rand_core::CryptoRngCore;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, ModelTrait, Set};
use color_eyre::eyre::{eyre, Result};
use totp_lite::{totp_custom, Sha1, DEFAULT_STEP};
use tracing::{event, instrument};

use crate::entities::prelude::*;
use crate::entities::user;

fn fill_bytes<R: CryptoRngCore, const N: usize>(rng: &mut R) -> [u8; N]
{
  let mut arr = [0; N];
  rng.fill_bytes(&mut arr);
  arr
}

pub struct TotpSecret(Vec<u8>);

impl TotpSecret
{
  pub fn generate() -> Self
  {
    Self(fill_bytes::<_, 128>(&mut thread_rng()).to_vec())
  }

  pub fn from_base32(encoded: &str) -> Result<Self>
  {
    base32::decode(Alphabet::RFC4648 { padding: false }, encoded.trim_end_matches('='))
      .map(Self)
      .ok_or_else(|| eyre!("pre-shared OTP secret is not valid base32"))
  }

  pub fn get_setup_code(&self, username: &str, issuer: &str) -> SetupCode
  {
    SetupCode(format!("otpauth://totp/{issuer}:{username}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits=6&period=30",
      secret = base32::encode(Alphabet::RFC4648 { padding: true }, &self.0),
      issuer = urlencode(issuer).unwrap_or_default(),
      username = urlencode(username).unwrap_or_default()))
  }
}

impl From<Vec<u8>> for TotpSecret
{
  fn from(raw: Vec<u8>) -> Self
  {
    Self(raw)
  }
}

impl From<TotpSecret> for Vec<u8>
{
  fn from(secret: TotpSecret) -> Self
  {
    secret.0
  }
}

pub struct SetupCode(String);

impl SetupCode
{
  pub fn get_qr_code(&self) -> Result<String, QrError>
  {
    Ok(QrCode::new(&self.0)?.render::<unicode::Dense1x2>()
      .dark_color(unicode::Dense1x2::Light)
      .light_color(unicode::Dense1x2::Dark)
      .build())
  }

  pub fn get_qr_svg(&self) -> Result<String, QrError>
  {
    Ok(QrCode::new(&self.0)?.render::<svg::Color>()
      .min_dimensions(200, 200)
      .build())
  }

  pub fn get_raw_code(&self) -> String
  {
    self.0.clone()
  }
}

/// Outcome of a credential check; the web layer maps every
/// `Denied` to one generic failure message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome
{
  Denied,
  EnrollmentRequired,
  Authenticated
}

fn create_hasher<'a>(pepper: &'a [u8]) -> Result<Argon2<'a>, argon2::Error>
{
  Argon2::new_with_secret(pepper, argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2::Params::default())
}

fn unix_seconds() -> u64
{
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn passcode_matches(secret: &[u8], passcode: &str) -> bool
{
  totp_custom::<Sha1>(DEFAULT_STEP, 6, secret, unix_seconds()) == passcode
}

#[derive(Clone)]
pub struct UserManager
{
  db: DatabaseConnection,
  issuer: String,
  pepper: Vec<u8>
}

impl UserManager
{
  pub fn new(db: DatabaseConnection, issuer: String, pepper: Vec<u8>) -> Result<Self>
  {
    Ok(Self
    {
      db,
      issuer,
      pepper
    })
  }

  /// New accounts carry no TOTP secret; enrollment happens at first login
  pub async fn register(&self, username: String, password: String) -> Result<()>
  {
    user::ActiveModel
    {
      username: Set(username),
      password_hash: Set(self.hash_password(password)?),
      totp_secret: Set(None)
    }.insert(&self.db).await?;

    Ok(())
  }

  fn hash_password(&self, password: String) -> Result<String>
  {
    Ok(create_hasher(&self.pepper)?.hash_password(password.as_bytes(), &SaltString::generate(&mut thread_rng()))?.to_string())
  }

  async fn get_user(&self, username: String) -> Result<user::Model>
  {
    User::find_by_id(username.clone()).one(&self.db).await?.ok_or_else(|| eyre!("User {} not found!", username))
  }

  pub async fn find(&self, username: String) -> Result<Option<user::Model>>
  {
    Ok(User::find_by_id(username).one(&self.db).await?)
  }

  pub async fn list(&self) -> Result<Vec<user::Model>>
  {
    Ok(User::find().all(&self.db).await?)
  }

  pub async fn delete(&self, username: String) -> Result<()>
  {
    self.get_user(username).await?.delete(&self.db).await?;
    Ok(())
  }

  pub async fn reset_password(&self, username: String, password: String) -> Result<()>
  {
    let mut user: user::ActiveModel = self.get_user(username).await?.into();
    user.password_hash = Set(self.hash_password(password)?);
    user.update(&self.db).await?;
    Ok(())
  }

  /// CLI path: mint a fresh secret immediately and hand back the
  /// provisioning URI for the operator to deliver
  pub async fn reset_mfa(&self, username: String) -> Result<SetupCode>
  {
    let secret = TotpSecret::generate();
    let setup_code = secret.get_setup_code(&username, &self.issuer);
    let mut user: user::ActiveModel = self.get_user(username).await?.into();
    user.totp_secret = Set(Some(secret.into()));
    user.update(&self.db).await?;
    Ok(setup_code)
  }

  /// Admin-panel path: drop the secret so the user re-enrolls at next login
  pub async fn clear_mfa(&self, username: String) -> Result<()>
  {
    let mut user: user::ActiveModel = self.get_user(username).await?.into();
    user.totp_secret = Set(None);
    user.update(&self.db).await?;
    Ok(())
  }

  /// Idempotent: an existing secret is re-displayed, never regenerated,
  /// so refreshing the setup page cannot orphan a scanned authenticator
  pub async fn begin_enrollment(&self, username: String, preset: Option<&str>) -> Result<SetupCode>
  {
    let user = self.get_user(username).await?;
    match user.totp_secret.clone()
    {
      Some(raw) => Ok(TotpSecret::from(raw).get_setup_code(&user.username, &self.issuer)),
      None =>
      {
        let secret = match preset
        {
          Some(encoded) => TotpSecret::from_base32(encoded)?,
          None => TotpSecret::generate()
        };
        let setup_code = secret.get_setup_code(&user.username, &self.issuer);
        let mut user: user::ActiveModel = user.into();
        user.totp_secret = Set(Some(secret.into()));
        user.update(&self.db).await?;
        Ok(setup_code)
      }
    }
  }

  #[instrument(skip(self, passcode))]
  pub async fn verify_totp(&self, username: String, passcode: &str) -> Result<bool>
  {
    let user = self.get_user(username).await?;
    Ok(user.totp_secret.as_deref().map_or(false, |secret| passcode_matches(secret, passcode)))
  }

  fn create_fake_user(&self) -> Result<user::Model>
  {
    Ok(user::Model
    {
      username: "kevin".to_owned(),
      password_hash: self.hash_password("hunter2".to_owned())?,
      totp_secret: Some(vec![0; 128])
    })
  }

  #[instrument(skip(self, password, passcode))]
  pub async fn validate(&self, username: String, password: &str, passcode: &str) -> Result<AuthOutcome>
  {
    // get the user, or get a fake one if we got a bad username
    let user = User::find_by_id(username).one(&self.db).await?;
    let faked = user.is_none();
    let fake_user = self.create_fake_user()?;
    let user = user.unwrap_or(fake_user);

    // validate the totp against whichever secret we ended up holding
    let enrolled = user.totp_secret.is_some();
    let passcode_valid = user.totp_secret.as_deref().map_or(false, |secret| passcode_matches(secret, passcode));

    // validate the password
    let known_hash = PasswordHash::new(&user.password_hash)?;
    let password_valid = match create_hasher(&self.pepper)?.verify_password(password.as_bytes(), &known_hash)
    {
      Err(err) =>
      {
        event!(tracing::Level::INFO, "{}", err.to_string());
        false
      }
      Ok(_) => true,
    };
    event!(tracing::Level::INFO, "username found: {}, password valid: {}, enrolled: {}, passcode valid: {}", !faked, password_valid, enrolled, passcode_valid);

    if faked || !password_valid
    {
      return Ok(AuthOutcome::Denied);
    }
    Ok(if !enrolled
    {
      AuthOutcome::EnrollmentRequired
    }
    else if passcode_valid
    {
      AuthOutcome::Authenticated
    }
    else
    {
      AuthOutcome::Denied
    })
  }
}

#[cfg(test)]
mod tests
{
  use super::*;
  use crate::db::connect;

  const PRESET_SECRET: &[u8] = b"0123456789ABCDEF0123";

  async fn manager(name: &str) -> UserManager
  {
    let (_, db) = connect(&format!("sqlite:file:{name}?mode=memory&cache=shared")).await.unwrap();
    UserManager::new(db, "blog.example.org".to_owned(), b"cluster pepper".to_vec()).unwrap()
  }

  fn preset_base32() -> String
  {
    base32::encode(Alphabet::RFC4648 { padding: false }, PRESET_SECRET)
  }

  fn current_code() -> String
  {
    totp_custom::<Sha1>(DEFAULT_STEP, 6, PRESET_SECRET, unix_seconds())
  }

  fn wrong_code() -> String
  {
    let valid = current_code();
    let flipped = if valid.starts_with('0') { '1' } else { '0' };
    format!("{}{}", flipped, &valid[1..])
  }

  #[tokio::test]
  async fn password_only_login_requires_enrollment()
  {
    let users = manager("um_enroll").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();

    let outcome = users.validate("alice".to_owned(), "correct horse", "").await.unwrap();
    assert_eq!(outcome, AuthOutcome::EnrollmentRequired);
  }

  #[tokio::test]
  async fn wrong_password_and_unknown_user_are_both_denied()
  {
    let users = manager("um_denied").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();

    assert_eq!(users.validate("alice".to_owned(), "battery staple", "").await.unwrap(), AuthOutcome::Denied);
    assert_eq!(users.validate("mallory".to_owned(), "correct horse", "").await.unwrap(), AuthOutcome::Denied);
  }

  #[tokio::test]
  async fn enrolled_user_needs_a_valid_passcode()
  {
    let users = manager("um_totp").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();
    users.begin_enrollment("alice".to_owned(), Some(&preset_base32())).await.unwrap();

    assert_eq!(users.validate("alice".to_owned(), "correct horse", &current_code()).await.unwrap(), AuthOutcome::Authenticated);
    assert_eq!(users.validate("alice".to_owned(), "correct horse", &wrong_code()).await.unwrap(), AuthOutcome::Denied);
    assert_eq!(users.validate("alice".to_owned(), "correct horse", "").await.unwrap(), AuthOutcome::Denied);
  }

  #[tokio::test]
  async fn enrollment_is_idempotent()
  {
    let users = manager("um_idem").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();

    let first = users.begin_enrollment("alice".to_owned(), None).await.unwrap();
    let second = users.begin_enrollment("alice".to_owned(), None).await.unwrap();
    assert_eq!(first.get_raw_code(), second.get_raw_code());
  }

  #[tokio::test]
  async fn clear_mfa_returns_user_to_enrollment()
  {
    let users = manager("um_clear").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();
    users.begin_enrollment("alice".to_owned(), Some(&preset_base32())).await.unwrap();
    users.clear_mfa("alice".to_owned()).await.unwrap();

    assert_eq!(users.validate("alice".to_owned(), "correct horse", "").await.unwrap(), AuthOutcome::EnrollmentRequired);
  }

  #[tokio::test]
  async fn stored_hash_is_not_the_password()
  {
    let users = manager("um_hash").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();

    let stored = users.get_user("alice".to_owned()).await.unwrap();
    assert!(stored.password_hash.starts_with("$argon2id$"));
    assert!(!stored.password_hash.contains("correct horse"));
  }

  #[tokio::test]
  async fn verify_totp_accepts_only_the_current_code()
  {
    let users = manager("um_verify").await;
    users.register("alice".to_owned(), "correct horse".to_owned()).await.unwrap();
    users.begin_enrollment("alice".to_owned(), Some(&preset_base32())).await.unwrap();

    assert!(users.verify_totp("alice".to_owned(), &current_code()).await.unwrap());
    assert!(!users.verify_totp("alice".to_owned(), &wrong_code()).await.unwrap());
  }
}
