use crate::core::aoi::Aoi;
use crate::types::{DateRange, Scene};

/// Default scene-level cloud cover ceiling, in percent
pub const DEFAULT_MAX_CLOUD_COVER: f32 = 20.0;

/// Key used to request a scene collection from a loader
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    pub sensor_id: String,
    pub dates: DateRange,
    pub aoi: Aoi,
    /// Scenes must report strictly less cloud cover than this
    pub max_cloud_cover: f32,
}

impl CollectionQuery {
    pub fn describe(&self) -> String {
        format!(
            "{} {} cloud<{}%",
            self.sensor_id, self.dates, self.max_cloud_cover
        )
    }

    /// Whether a scene satisfies every filter of the query
    pub fn accepts(&self, scene: &Scene) -> bool {
        scene.sensor_id == self.sensor_id
            && self.dates.contains(&scene.acquired)
            && scene.cloud_cover < self.max_cloud_cover
            && self.aoi.overlaps(&scene.grid.bounds())
    }
}

/// Ordered sequence of scenes from one sensor
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    scenes: Vec<Scene>,
}

impl SceneCollection {
    /// Build a collection ordered by acquisition time
    pub fn new(mut scenes: Vec<Scene>) -> Self {
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        Self { scenes }
    }

    /// Keep only scenes matching the query
    pub fn filter(self, query: &CollectionQuery) -> Self {
        let before = self.scenes.len();
        let scenes: Vec<Scene> = self
            .scenes
            .into_iter()
            .filter(|s| {
                let keep = query.accepts(s);
                if !keep {
                    log::debug!(
                        "Dropping scene {} ({}, cloud {}%) from {}",
                        s.id,
                        s.acquired,
                        s.cloud_cover,
                        query.describe()
                    );
                }
                keep
            })
            .collect();
        log::info!("Collection filter kept {}/{} scenes for {}", scenes.len(), before, query.describe());
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    pub fn into_scenes(self) -> Vec<Scene> {
        self.scenes
    }
}
