use std::{collections::HashMap, path::PathBuf, sync::Arc, time::SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Templates shipped with the binary, used when the template directory has no override.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[(
    "image-manager-list.html.liquid",
    include_str!("../templates/image-manager-list.html.liquid"),
)];

pub struct TemplateEngine {
    template_dir: PathBuf,
    cache: Arc<RwLock<HashMap<String, CachedTemplate>>>,
}

struct CachedTemplate {
    content: String,
    modified: SystemTime,
}

impl TemplateEngine {
    pub fn new(template_dir: PathBuf) -> Self {
        Self {
            template_dir,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn builtin_template(name: &str) -> Option<&'static str> {
        BUILTIN_TEMPLATES
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(_, content)| *content)
    }

    async fn load_template(&self, path: &str) -> Result<String, String> {
        let template_path = self.template_dir.join(path);

        let metadata = match tokio::fs::metadata(&template_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                return Self::builtin_template(path)
                    .map(|content| {
                        debug!("Using built-in template for {}", path);
                        content.to_string()
                    })
                    .ok_or_else(|| format!("Failed to get metadata for {}: {}", path, e));
            }
        };

        let modified = metadata
            .modified()
            .map_err(|e| format!("Failed to get modified time: {}", e))?;

        let mut cache = self.cache.write().await;

        if let Some(cached) = cache.get(path)
            && cached.modified >= modified
        {
            debug!("Using cached template for {}", path);
            return Ok(cached.content.clone());
        }

        info!("Loading template: {}", path);

        let content = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| format!("Failed to read template {}: {}", path, e))?;

        cache.insert(
            path.to_string(),
            CachedTemplate {
                content: content.clone(),
                modified,
            },
        );

        Ok(content)
    }

    pub async fn render_template(
        &self,
        template_name: &str,
        globals: liquid::Object,
    ) -> Result<String, String> {
        let template_content = self.load_template(template_name).await?;

        let parser = liquid::ParserBuilder::with_stdlib()
            .build()
            .map_err(|e| format!("Failed to create parser: {}", e))?;

        let template = parser
            .parse(&template_content)
            .map_err(|e| format!("Failed to parse template: {}", e))?;

        template
            .render(&globals)
            .map_err(|e| format!("Failed to render template: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builtin_template_used_without_override() {
        let temp_dir = TempDir::new().unwrap();
        let engine = TemplateEngine::new(temp_dir.path().to_path_buf());

        let html = engine
            .render_template(
                "image-manager-list.html.liquid",
                liquid::object!({
                    "images": Vec::<liquid::model::Value>::new(),
                    "has_more": false,
                    "warning": "Out of memory",
                    "page": 1,
                    "next_page": 2,
                }),
            )
            .await
            .unwrap();

        assert!(html.contains("Out of memory"));
    }

    #[tokio::test]
    async fn test_directory_override_wins() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("image-manager-list.html.liquid"),
            "custom {{ page }}",
        )
        .unwrap();
        let engine = TemplateEngine::new(temp_dir.path().to_path_buf());

        let html = engine
            .render_template(
                "image-manager-list.html.liquid",
                liquid::object!({ "page": 3 }),
            )
            .await
            .unwrap();
        assert_eq!(html, "custom 3");
    }

    #[tokio::test]
    async fn test_missing_template_errors() {
        let temp_dir = TempDir::new().unwrap();
        let engine = TemplateEngine::new(temp_dir.path().to_path_buf());
        let result = engine
            .render_template("nope.html.liquid", liquid::object!({}))
            .await;
        assert!(result.is_err());
    }
}
