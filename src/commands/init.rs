use anyhow::{Context, Result};
use citydir::config::Config;
use std::path::PathBuf;

pub async fn init_config(path: PathBuf) -> Result<()> {
    let config = Config::default();
    let config_path = path.join("citydir.toml");

    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    let toml_content = format!(
        r#"# citydir configuration

[pipeline]
data_dir = "{}"
# manifest = "directories.json"
# min_year = 1850
# max_year = 1900
log_every_pages = {}
log_every_lines = {}
line_buffer = {}

[download]
# base_url = "https://example.org/city-directories/"
max_concurrent = {}
timeout_secs = {}

[parser]
# Directory holding parse.py, and the CRF training data
# path = "city-directory-entry-parser"
# training = "city-directory-entry-parser/training/training.csv"
interpreter = "{}"
result_buffer = {}

[resolver]
# One street name per line
# streets = "streets.txt"
max_edit_distance = {}
lookup_concurrency = {}

[logging]
format = "text"
level = "info"
"#,
        config.pipeline.data_dir.display(),
        config.pipeline.log_every_pages,
        config.pipeline.log_every_lines,
        config.pipeline.line_buffer,
        config.download.max_concurrent,
        config.download.timeout_secs,
        config.parser.interpreter,
        config.parser.result_buffer,
        config.resolver.max_edit_distance,
        config.resolver.lookup_concurrency,
    );

    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    std::fs::write(&config_path, toml_content)?;
    println!("Created configuration file: {}", config_path.display());

    let data_dir = path.join(&config.pipeline.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    println!("Created data directory: {}", data_dir.display());

    Ok(())
}
