//! Process-wide collaborators shared by every card

use crate::config::ProjectConfig;
use crate::data::{BrowserFetch, CsvManager, Fetch};
use crate::errors::ErrorCollector;
use crate::maps::{EchartsRegistry, MapManager, MapRegistry};
use std::rc::Rc;

/// Error collector, CSV loader and map manager of one dashboard
///
/// Constructed once and handed to cards by reference.
#[derive(Clone)]
pub struct Services {
    pub collector: Rc<ErrorCollector>,
    pub csv: Rc<CsvManager>,
    pub maps: Rc<MapManager>,
}

impl Services {
    pub fn new(project: &ProjectConfig, fetch: Rc<dyn Fetch>, registry: Rc<dyn MapRegistry>) -> Self {
        let collector = Rc::new(ErrorCollector::new());
        let csv = Rc::new(CsvManager::new(
            project.data_sources.clone(),
            fetch.clone(),
            collector.clone(),
        ));
        let maps = Rc::new(MapManager::new(fetch, registry, collector.clone()));
        Self { collector, csv, maps }
    }

    /// Services backed by `window.fetch` and the page's chart library
    pub fn browser(project: &ProjectConfig) -> Self {
        Self::new(project, Rc::new(BrowserFetch), Rc::new(EchartsRegistry))
    }

    /// Point the loaders at a new project manifest
    ///
    /// Maps are diffed against the previous list; CSV results already loaded stay cached.
    pub async fn apply_project(&self, project: &ProjectConfig) {
        self.csv.set_sources(project.data_sources.clone());
        self.maps.sync_maps_config(project.geo.clone()).await;
    }
}
