//! The four concrete pipeline stages.

pub mod command;
pub mod enrich;
pub mod load;

use std::sync::Arc;

use kara_core::config::KaraConfig;
use kara_enrich::{CommandClassifier, EnrichmentLoader};
use kara_ingest::LakeLoader;
use kara_storage::Database;

use crate::stage::StageRegistry;

pub use command::CommandStage;
pub use enrich::EnrichStage;
pub use load::LoadStage;

/// Registry with every stage built from configuration.
pub fn default_registry(config: &KaraConfig, db: Arc<Database>) -> StageRegistry {
    let classifier = Arc::new(CommandClassifier::from_config(&config.classifier));

    let mut registry = StageRegistry::new();
    registry.register(Arc::new(CommandStage::scrape(&config.stages)));
    registry.register(Arc::new(LoadStage::new(LakeLoader::new(config, db.clone()))));
    registry.register(Arc::new(CommandStage::transform(&config.stages)));
    registry.register(Arc::new(EnrichStage::new(EnrichmentLoader::new(
        classifier, db, config,
    ))));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use kara_core::types::StageName;

    #[test]
    fn test_default_registry_has_every_stage() {
        let db = Arc::new(Database::in_memory().unwrap());
        let registry = default_registry(&KaraConfig::default(), db);
        assert_eq!(registry.len(), StageName::ALL.len());
        for name in StageName::ALL {
            assert_eq!(registry.get(name).unwrap().name(), name);
        }
    }
}
