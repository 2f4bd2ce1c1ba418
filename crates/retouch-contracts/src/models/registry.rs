use indexmap::IndexMap;

pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub aliases: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|alias| alias == name)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    /// Looks a model up by name or alias. A leading `models/` is ignored.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        let trimmed = name.trim();
        let name = trimmed.strip_prefix("models/").unwrap_or(trimmed);
        self.models
            .get(name)
            .or_else(|| self.models.values().find(|model| model.answers_to(name)))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], aliases: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                aliases: aliases.iter().map(|item| (*item).to_string()).collect(),
            },
        );
    };

    // First entry is the default for the "edit" capability.
    insert(
        DEFAULT_EDIT_MODEL,
        "gemini",
        &["image", "edit"],
        &["nano-banana", "google/gemini-2.5-flash-image"],
    );
    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &["image", "edit"],
        &["google/gemini-2.5-flash-image-preview"],
    );
    insert(
        "gemini-3-pro-image-preview",
        "gemini",
        &["image", "edit"],
        &["nano-banana-pro", "google/gemini-3-pro-image-preview"],
    );

    map
}
