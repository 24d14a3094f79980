use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::db::entities::{prelude::Project, project};

/// Project resolution boundary. Check-in volume makes this the hottest
/// read in the pipeline, so the production implementation caches.
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    async fn get_by_id(&self, id: i32) -> Result<Option<project::Model>, DbErr>;
}

pub struct CachedProjectLookup {
    db: DatabaseConnection,
    cache: DashMap<i32, project::Model>,
}

impl CachedProjectLookup {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl ProjectLookup for CachedProjectLookup {
    async fn get_by_id(&self, id: i32) -> Result<Option<project::Model>, DbErr> {
        if let Some(hit) = self.cache.get(&id) {
            return Ok(Some(hit.clone()));
        }

        let project = Project::find_by_id(id).one(&self.db).await?;
        if let Some(ref model) = project {
            self.cache.insert(id, model.clone());
        }
        Ok(project)
    }
}
