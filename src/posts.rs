use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait, QueryOrder, Set};
use color_eyre::eyre::{eyre, Result};
use tracing::instrument;

use crate::entities::post;
use crate::entities::prelude::*;

#[derive(Clone)]
pub struct PostManager
{
  db: DatabaseConnection
}

impl PostManager
{
  pub fn new(db: DatabaseConnection) -> Self
  {
    Self { db }
  }

  /// Newest first
  pub async fn list(&self) -> Result<Vec<post::Model>>
  {
    Ok(Post::find().order_by_desc(post::Column::Id).all(&self.db).await?)
  }

  pub async fn get(&self, id: i64) -> Result<post::Model>
  {
    Post::find_by_id(id).one(&self.db).await?.ok_or_else(|| eyre!("Post {} not found!", id))
  }

  pub async fn count(&self) -> Result<u64>
  {
    Ok(Post::find().count(&self.db).await?)
  }

  #[instrument(skip(self, body))]
  pub async fn create(&self, title: String, body: String) -> Result<post::Model>
  {
    Ok(post::ActiveModel
    {
      title: Set(title),
      body: Set(body),
      ..Default::default()
    }.insert(&self.db).await?)
  }

  #[instrument(skip(self, body))]
  pub async fn update(&self, id: i64, title: String, body: String) -> Result<()>
  {
    let mut post: post::ActiveModel = self.get(id).await?.into();
    post.title = Set(title);
    post.body = Set(body);
    post.update(&self.db).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn delete(&self, id: i64) -> Result<()>
  {
    self.get(id).await?.delete(&self.db).await?;
    Ok(())
  }
}
