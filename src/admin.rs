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

use askama::Template;
use axum::{extract::Path, http::StatusCode, response::{IntoResponse, Redirect, Response}, routing::{get, post}, Extension, Form, Router};
use axum_sessions::extractors::WritableSession;
use serde::Deserialize;
use tracing::instrument;

use crate::entities::post;
use crate::session::WritableSessionExt;
use crate::web::{is_logged_in, login_redirect, TracedError, WebServer};

#[derive(Deserialize, Debug)]
struct PostForm
{
  title: String,
  body: String
}

#[derive(Deserialize, Debug)]
struct NewUserForm
{
  username: String,
  password: String
}

#[derive(Template)]
#[template(path = "admin_index.html")]
struct DashboardPage
{
  site: String,
  username: String,
  post_count: u64,
  user_count: u64,
  flash: Option<String>
}

#[derive(Template)]
#[template(path = "admin_posts.html")]
struct PostsPage
{
  site: String,
  posts: Vec<post::Model>,
  flash: Option<String>
}

#[derive(Template)]
#[template(path = "admin_post_form.html")]
struct PostFormPage
{
  site: String,
  heading: String,
  action: String,
  title: String,
  body: String,
  flash: Option<String>
}

/// Hash and secret never leave the users table; the listing carries
/// only the username and the enrollment state
struct UserRow
{
  username: String,
  mfa_enrolled: bool
}

#[derive(Template)]
#[template(path = "admin_users.html")]
struct UsersPage
{
  site: String,
  users: Vec<UserRow>,
  flash: Option<String>
}

#[derive(Template)]
#[template(path = "admin_user_form.html")]
struct UserFormPage
{
  site: String,
  flash: Option<String>
}

macro_rules! require_login
{
  ($session:expr) =>
  {
    if !is_logged_in(&$session)
    {
      return Ok(login_redirect(&mut $session).into_response());
    }
  }
}

pub fn router() -> Router
{
  Router::new()
    .route("/", get(dashboard_handler))
    .route("/posts", get(posts_handler))
    .route("/posts/new", get(new_post_form_handler).post(create_post_handler))
    .route("/posts/:id/edit", get(edit_post_form_handler).post(update_post_handler))
    .route("/posts/:id/delete", post(delete_post_handler))
    .route("/users", get(users_handler))
    .route("/users/new", get(new_user_form_handler).post(create_user_handler))
    .route("/users/:username/delete", post(delete_user_handler))
    .route("/users/:username/reset-mfa", post(reset_mfa_handler))
}

#[instrument(skip_all)]
async fn dashboard_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession
) -> Result<Response, StatusCode>
{
  require_login!(session);
  Ok(DashboardPage
  {
    site: this.site.clone(),
    username: session.get::<String>(crate::web::USERNAME).unwrap_or_default(),
    post_count: this.posts.count().await.trace_error()?,
    user_count: this.users.list().await.trace_error()?.len() as u64,
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn posts_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession
) -> Result<Response, StatusCode>
{
  require_login!(session);
  Ok(PostsPage
  {
    site: this.site.clone(),
    posts: this.posts.list().await.trace_error()?,
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn new_post_form_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession
) -> Result<Response, StatusCode>
{
  require_login!(session);
  Ok(PostFormPage
  {
    site: this.site.clone(),
    heading: "New post".to_owned(),
    action: "/admin/posts/new".to_owned(),
    title: String::new(),
    body: String::new(),
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn create_post_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  form: Form<PostForm>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  if form.title.trim().is_empty() || form.body.trim().is_empty()
  {
    session.flash("Title and content are required.");
    return Ok(Redirect::to("/admin/posts/new").into_response());
  }
  this.posts.create(form.title.clone(), form.body.clone()).await.trace_error()?;
  session.flash("Post created.");
  Ok(Redirect::to("/admin/posts").into_response())
}

#[instrument(skip_all)]
async fn edit_post_form_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  Path(id): Path<i64>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  let existing = this.posts.get(id).await.trace_error()?;
  Ok(PostFormPage
  {
    site: this.site.clone(),
    heading: "Edit post".to_owned(),
    action: format!("/admin/posts/{id}/edit"),
    title: existing.title,
    body: existing.body,
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn update_post_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  Path(id): Path<i64>,
  form: Form<PostForm>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  if form.title.trim().is_empty() || form.body.trim().is_empty()
  {
    session.flash("Title and content are required.");
    return Ok(Redirect::to(&format!("/admin/posts/{id}/edit")).into_response());
  }
  this.posts.update(id, form.title.clone(), form.body.clone()).await.trace_error()?;
  session.flash("Post updated.");
  Ok(Redirect::to("/admin/posts").into_response())
}

#[instrument(skip_all)]
async fn delete_post_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  Path(id): Path<i64>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  this.posts.delete(id).await.trace_error()?;
  session.flash("Post deleted.");
  Ok(Redirect::to("/admin/posts").into_response())
}

#[instrument(skip_all)]
async fn users_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession
) -> Result<Response, StatusCode>
{
  require_login!(session);
  let users = this.users.list().await.trace_error()?
    .into_iter()
    .map(|user| UserRow
    {
      username: user.username,
      mfa_enrolled: user.totp_secret.is_some()
    })
    .collect();
  Ok(UsersPage
  {
    site: this.site.clone(),
    users,
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn new_user_form_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession
) -> Result<Response, StatusCode>
{
  require_login!(session);
  Ok(UserFormPage
  {
    site: this.site.clone(),
    flash: session.take_flash()
  }.into_response())
}

#[instrument(skip_all)]
async fn create_user_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  form: Form<NewUserForm>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  if form.username.trim().is_empty() || form.password.is_empty()
  {
    session.flash("Username and password are required.");
    return Ok(Redirect::to("/admin/users/new").into_response());
  }
  if this.users.find(form.username.clone()).await.trace_error()?.is_some()
  {
    session.flash("That username is already taken.");
    return Ok(Redirect::to("/admin/users/new").into_response());
  }
  this.users.register(form.username.clone(), form.password.clone()).await.trace_error()?;
  session.flash("User created; they will enroll in MFA at first login.");
  Ok(Redirect::to("/admin/users").into_response())
}

#[instrument(skip_all)]
async fn delete_user_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  Path(username): Path<String>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  this.users.delete(username).await.trace_error()?;
  session.flash("User deleted.");
  Ok(Redirect::to("/admin/users").into_response())
}

#[instrument(skip_all)]
async fn reset_mfa_handler(
  Extension(this): Extension<WebServer>,
  mut session: WritableSession,
  Path(username): Path<String>
) -> Result<Response, StatusCode>
{
  require_login!(session);
  this.users.clear_mfa(username).await.trace_error()?;
  session.flash("MFA cleared; the user will re-enroll at next login.");
  Ok(Redirect::to("/admin/users").into_response())
}
