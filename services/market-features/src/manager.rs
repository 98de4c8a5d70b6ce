//! Feature manager
//!
//! Owns one history together with the indicator state registry used for
//! reductions over it. `get` resolves a window into a source and hands it
//! to the requested set-feature.

use tracing::debug;
use types::errors::{FeatureError, HistoryError};
use types::time::Timestamped;

use crate::features::Feature;
use crate::history::History;
use crate::parameters::Parameters;
use crate::registry::ResultStoreRegistry;
use crate::set_features::SetFeature;
use crate::source::WindowSpec;

pub struct FeatureManager<T> {
    history: History<T>,
    registry: ResultStoreRegistry,
}

impl<T: Timestamped> FeatureManager<T> {
    pub fn new(history: History<T>, registry_capacity: usize) -> Self {
        Self {
            history,
            registry: ResultStoreRegistry::new(registry_capacity),
        }
    }

    pub fn record(&mut self, event: T) -> Result<(), HistoryError> {
        self.history.record(event)
    }

    pub fn history(&self) -> &History<T> {
        &self.history
    }

    pub fn registry(&self) -> &ResultStoreRegistry {
        &self.registry
    }

    /// Reduce `feature` over the window described by `window`.
    pub fn get<F>(
        &mut self,
        set_feature: SetFeature,
        feature: &F,
        window: &WindowSpec,
        parameters: &Parameters,
    ) -> Result<f64, FeatureError>
    where
        F: Feature<T> + ?Sized,
    {
        let source = self.history.source_for(window);
        let value = set_feature.compute(feature, &source, parameters, &mut self.registry)?;
        debug!(
            set_feature = set_feature.name(),
            feature = feature.id(),
            window = ?window,
            size = source.len(),
            value,
            "Feature computed"
        );
        Ok(value)
    }

    /// Like [`get`](Self::get), restricted to events matching `predicate`.
    pub fn get_where<'s, F>(
        &'s mut self,
        set_feature: SetFeature,
        feature: &F,
        window: &WindowSpec,
        predicate: impl Fn(&T) -> bool + 's,
        parameters: &Parameters,
    ) -> Result<f64, FeatureError>
    where
        F: Feature<T> + ?Sized,
    {
        let source = self.history.source_for(window).with_filter(predicate);
        set_feature.compute(feature, &source, parameters, &mut self.registry)
    }
}
