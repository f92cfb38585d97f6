use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub bridge_url: Option<String>,
    pub bundle_dir: String,
    pub scratch_dir: String,
    pub demo_image_asset: String,
    pub demo_text: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_url: None,
            bundle_dir: "./bundle".into(),
            scratch_dir: "./data/scratch".into(),
            demo_image_asset: "assets/test-image.png".into(),
            demo_text: "Hola Texto".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("panel.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bridge_url") {
                settings.bridge_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("bundle_dir") {
                settings.bundle_dir = v.clone();
            }
            if let Some(v) = file_cfg.get("scratch_dir") {
                settings.scratch_dir = v.clone();
            }
            if let Some(v) = file_cfg.get("demo_image_asset") {
                settings.demo_image_asset = v.clone();
            }
            if let Some(v) = file_cfg.get("demo_text") {
                settings.demo_text = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("PANEL_BRIDGE_URL") {
        settings.bridge_url = Some(v);
    }
    if let Ok(v) = std::env::var("PANEL_BUNDLE_DIR") {
        settings.bundle_dir = v;
    }
    if let Ok(v) = std::env::var("PANEL_SCRATCH_DIR") {
        settings.scratch_dir = v;
    }
    if let Ok(v) = std::env::var("PANEL_DEMO_IMAGE_ASSET") {
        settings.demo_image_asset = v;
    }
    if let Ok(v) = std::env::var("PANEL_DEMO_TEXT") {
        settings.demo_text = v;
    }

    settings
}
