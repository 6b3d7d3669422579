use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use iocat_engine::{Classifier, ClassifierError, TagSuggestion};

/// Returns canned suggestions keyed by file name and counts how often it runs.
#[derive(Default)]
pub struct StaticClassifier {
    by_file: BTreeMap<String, Vec<TagSuggestion>>,
    calls: AtomicUsize,
}

impl StaticClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, suggestions: &[(&str, f32)]) -> Self {
        self.by_file.insert(
            file_name.to_string(),
            suggestions
                .iter()
                .map(|(tag, confidence)| TagSuggestion::new(*tag, *confidence))
                .collect(),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    fn classify(&self, path: &Path) -> Result<Vec<TagSuggestion>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.by_file
            .get(&file_name)
            .cloned()
            .ok_or_else(|| ClassifierError::Failed {
                classifier: self.name().to_string(),
                path: path.display().to_string(),
                reason: "no canned result".to_string(),
            })
    }
}
