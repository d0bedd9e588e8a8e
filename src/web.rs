use askama::Template;
use axum::{routing::get, http::{StatusCode, HeaderValue}, Router, Extension, Form, TypedHeader, headers::{Header, HeaderName, self}, response::{IntoResponse, Redirect, Response}};
use axum_server::tls_rustls::RustlsConfig;
use axum_sessions::async_session::serde_json;
use axum_sessions::extractors::WritableSession;
use base64::{engine::general_purpose, Engine};
use rand::thread_rng;
use rand_core::RngCore;
use serde::Deserialize;
use tracing::{instrument, event};
use std::{net::SocketAddr, iter::once, fmt::Display, time::Duration};
use color_eyre::eyre::Result;
use tokio::{task, time, join};

use crate::{admin, entities::post, posts::PostManager, session::{RouterExt, SessionBackendStorage, WritableSessionExt}, settings::{BehaviourSettings, KeyPair}, user_manager::{AuthOutcome, UserManager}};

pub(crate) const LOGGED_IN: &str = "logged_in";
pub(crate) const USERNAME: &str = "username";
pub(crate) const MFA_PENDING: &str = "mfa_pending";
const AUTHENTICITY_TOKEN: &str = "authenticity_token";

/// One string for every credential failure
pub(crate) const BAD_CREDENTIALS: &str = "Invalid username, password, or passcode.";

#[derive(Deserialize, Debug)]
struct LoginForm
{
  authenticity_token: String,
  username: String,
  password: String,
  #[serde(default)]
  passcode: String
}

#[derive(Deserialize, Debug)]
struct PasscodeForm
{
  passcode: String
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage
{
  site: String,
  posts: Vec<post::Model>,
  logged_in: bool,
  flash: Option<String>
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginPage
{
  site: String,
  authenticity_token: String,
  flash: Option<String>
}

#[derive(Template)]
#[template(path = "setup_mfa.html")]
struct SetupMfaPage
{
  site: String,
  qr_svg: String,
  otpauth_url: String,
  flash: Option<String>
}

macro_rules! header
{
  ($struct_name:ident, $header_value:expr) =>
  {
    pub(crate) struct $struct_name(pub(crate) String);

    impl Header for $struct_name
    {
      fn name() -> &'static HeaderName
      {
        static NAME: HeaderName = HeaderName::from_static($header_value);
        &NAME
      }

      fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
      where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>
      {
        let value = values
          .next()
          .ok_or_else(headers::Error::invalid)?;

        Ok($struct_name(value.to_str().unwrap_or("").to_owned()))
      }

      fn encode<E: Extend<HeaderValue>>(&self, values: &mut E)
      {
        let value = HeaderValue::from_str(&self.0).unwrap_or(HeaderValue::from_static(""));
        values.extend(once(value));
      }
    }
  }
}

header!(XForwardedFor, "x-forwarded-for");

pub(crate) trait TracedError<T, E: Display>: Sized
{
  fn trace_error(self) -> Result<T, StatusCode>;
}

impl<T, E: Display> TracedError<T, E> for Result<T, E>
{
  fn trace_error(self) -> Result<T, StatusCode>
  {
    self.map_err(|err|
    {
      event!(tracing::Level::ERROR, "{}", err.to_string());
      StatusCode::INTERNAL_SERVER_ERROR
    })
  }
}

pub(crate) fn is_logged_in(session: &WritableSession) -> bool
{
  session.get::<bool>(LOGGED_IN).map_or(false, |logged_in| logged_in)
}

pub(crate) fn login_redirect(session: &mut WritableSession) -> Redirect
{
  session.flash("Please log in to access this page.");
  Redirect::to("/login")
}

/// Whose secret may the MFA setup page show: a login in progress
/// (password step passed) or an already-established session
fn enrollment_user(session: &WritableSession) -> Option<String>
{
  session.get::<String>(MFA_PENDING).or_else(||
  {
    if is_logged_in(session)
    {
      session.get::<String>(USERNAME)
    }
    else
    {
      None
    }
  })
}

fn issue_authenticity_token(session: &mut WritableSession) -> Result<String, serde_json::Error>
{
  let mut challenge = [0; 64];
  thread_rng().fill_bytes(&mut challenge);
  let token = general_purpose::STANDARD.encode(challenge);
  session.insert(AUTHENTICITY_TOKEN, &token)?;
  Ok(token)
}

#[derive(Clone)]
pub struct WebServer
{
  pub(crate) users: UserManager,
  pub(crate) posts: PostManager,
  pub(crate) behaviour: BehaviourSettings,
  session_timeout_seconds: Option<u64>,
  pub(crate) site: String
}

impl WebServer
{
  pub fn new(users: UserManager, posts: PostManager, behaviour: BehaviourSettings, session_timeout_seconds: Option<u64>, site: String) -> Self
  {
    Self { users, posts, behaviour, session_timeout_seconds, site }
  }

  pub fn app(&self, storage: SessionBackendStorage) -> Router
  {
    Router::new()
      .route("/", get(Self::home_handler))
      .route("/login", get(Self::login_form_handler).post(Self::login_handler))
      .route("/logout", get(Self::logout_handler))
      .route("/setup-mfa", get(Self::mfa_setup_handler).post(Self::mfa_confirm_handler))
      .nest("/admin", admin::router())
      .layer(Extension(self.clone()))
      .layer_session(storage)
  }

  #[instrument(skip(self, storage, addr, tls_keypair))]
  pub async fn run(self, storage: SessionBackendStorage, addr: SocketAddr, tls_keypair: Option<KeyPair>) -> Result<()>
  {
    let router = self.app(storage.clone());

    storage.migrate().await?;
    let cleanup = task::spawn(async move
    {
      let mut interval = time::interval(Duration::from_secs(3600));
      loop
      {
        interval.tick().await;
        if let Err(error) = storage.cleanup().await
        {
          event!(tracing::Level::ERROR, "{}", error);
        }
      }
    });

    let service = router.into_make_service();
    let (cleanup, server) = if let Some(keypair) = tls_keypair
    {
      let config = RustlsConfig::from_pem_file(keypair.public_key, keypair.private_key).await?;
      join!(cleanup, axum_server::bind_rustls(addr, config).serve(service))
    }
    else
    {
      join!(cleanup, axum_server::bind(addr).serve(service))
    };

    cleanup?;
    server?;

    Ok(())
  }

  pub(crate) fn extend_session(&self, session: &mut WritableSession)
  {
    if let Some(expires) = self.session_timeout_seconds
    {
      session.expire_in(Duration::from_secs(expires));
    }
  }

  #[instrument(skip_all)]
  async fn home_handler(
    Extension(this): Extension<Self>,
    mut session: WritableSession
  ) -> Result<impl askama_axum::IntoResponse, StatusCode>
  {
    Ok(IndexPage
    {
      site: this.site.clone(),
      posts: this.posts.list().await.trace_error()?,
      logged_in: is_logged_in(&session),
      flash: session.take_flash()
    })
  }

  #[instrument(skip_all)]
  async fn login_form_handler(
    Extension(this): Extension<Self>,
    mut session: WritableSession
  ) -> Result<impl askama_axum::IntoResponse, StatusCode>
  {
    Ok(LoginPage
    {
      site: this.site.clone(),
      authenticity_token: issue_authenticity_token(&mut session).trace_error()?,
      flash: session.take_flash()
    })
  }

  #[instrument(skip_all)]
  async fn login_handler(
    Extension(this): Extension<Self>,
    mut session: WritableSession,
    origin_host: Option<TypedHeader<XForwardedFor>>,
    form: Form<LoginForm>
  ) -> Result<Redirect, StatusCode>
  {
    let token_valid = session
      .take::<String>(AUTHENTICITY_TOKEN)
      .map_or(false, |token| token == form.authenticity_token);
    let outcome = if token_valid
    {
      this.users.validate(form.username.clone(), &form.password, &form.passcode).await.trace_error()?
    }
    else
    {
      AuthOutcome::Denied
    };

    Ok(match outcome
    {
      AuthOutcome::Authenticated =>
      {
        session.regenerate();
        session.insert(LOGGED_IN, true).trace_error()?;
        session.insert(USERNAME, &form.username).trace_error()?;
        this.extend_session(&mut session);
        Redirect::to("/admin")
      },
      AuthOutcome::EnrollmentRequired =>
      {
        session.regenerate();
        session.insert(MFA_PENDING, &form.username).trace_error()?;
        Redirect::to("/setup-mfa")
      },
      AuthOutcome::Denied =>
      {
        let host = origin_host.map(|TypedHeader(XForwardedFor(host))| host).unwrap_or_default();
        event!(tracing::Level::INFO, "rejected login for {:?} from {:?}", form.username, host);
        session.flash(BAD_CREDENTIALS);
        Redirect::to("/login")
      }
    })
  }

  #[instrument(skip_all)]
  async fn logout_handler(mut session: WritableSession) -> Result<Redirect, StatusCode>
  {
    session.insert(LOGGED_IN, false).trace_error()?;
    session.remove(USERNAME);
    session.remove(MFA_PENDING);
    session.regenerate();
    session.flash("You have been logged out.");
    Ok(Redirect::to("/"))
  }

  #[instrument(skip_all)]
  async fn mfa_setup_handler(
    Extension(this): Extension<Self>,
    mut session: WritableSession
  ) -> Result<Response, StatusCode>
  {
    let username = match enrollment_user(&session)
    {
      Some(username) => username,
      None => return Ok(login_redirect(&mut session).into_response())
    };
    let setup_code = this.users.begin_enrollment(username, this.behaviour.otp_secret.as_deref()).await.trace_error()?;
    Ok(SetupMfaPage
    {
      site: this.site.clone(),
      qr_svg: setup_code.get_qr_svg().trace_error()?,
      otpauth_url: setup_code.get_raw_code(),
      flash: session.take_flash()
    }.into_response())
  }

  #[instrument(skip_all)]
  async fn mfa_confirm_handler(
    Extension(this): Extension<Self>,
    mut session: WritableSession,
    form: Form<PasscodeForm>
  ) -> Result<Redirect, StatusCode>
  {
    let username = match enrollment_user(&session)
    {
      Some(username) => username,
      None => return Ok(login_redirect(&mut session))
    };
    Ok(if this.users.verify_totp(username.clone(), &form.passcode).await.trace_error()?
    {
      session.remove(MFA_PENDING);
      session.regenerate();
      session.insert(LOGGED_IN, true).trace_error()?;
      session.insert(USERNAME, &username).trace_error()?;
      this.extend_session(&mut session);
      session.flash("Two-factor authentication enabled.");
      Redirect::to("/admin")
    }
    else
    {
      session.flash(BAD_CREDENTIALS);
      Redirect::to("/setup-mfa")
    })
  }
}
