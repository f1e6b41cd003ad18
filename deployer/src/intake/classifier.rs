//! Free-text intent classification

use crate::models::intent::{Intent, Provider, Resource};

/// Maps a free-text deployment request to an [`Intent`]
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
}

/// Keyword matching classifier. Provider defaults to gcp, resource to vm.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Intent {
        let text = text.to_lowercase();

        let provider = if text.contains("aws") {
            Provider::Aws
        } else if text.contains("azure") {
            Provider::Azure
        } else {
            Provider::Gcp
        };

        let mut resource = Resource::Vm;
        if text.contains("cloud run") {
            resource = Resource::CloudRun;
        }
        if provider == Provider::Aws
            && ["serverless", "app runner", "container"]
                .iter()
                .any(|kw| text.contains(kw))
        {
            resource = Resource::AppRunner;
        }
        // Checked last so it wins
        if text.contains("kubernetes") || text.contains("k8s") {
            resource = Resource::K8s;
        }

        Intent::new(provider, resource)
    }
}
