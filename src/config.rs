use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{de, Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use std::io::ErrorKind;
use std::time::Duration;
use url::Url;

fn deserialize_path<'de, D>(de: D) -> Result<Utf8PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = de::Deserialize::deserialize(de)?;
    Ok(Utf8PathBuf::from(s))
}

fn deserialize_url<'de, D>(de: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = de::Deserialize::deserialize(de)?;
    let url = Url::parse(&s).map_err(de::Error::custom)?;
    if url.cannot_be_a_base() {
        return Err(de::Error::custom(format!("{} cannot be used as a base url", s)));
    }
    Ok(url)
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: Backend,
    #[serde(default)]
    pub scanner: Scanner,
}

impl Config {
    /// Reads the YAML config at `path`.
    ///
    /// `base_url` overrides `backend.base_url`. With an override the file may be absent,
    /// in which case every other setting takes its default.
    pub fn read(path: &Utf8Path, base_url: Option<&Url>) -> Result<Config> {
        let mut value = match std::fs::read_to_string(path) {
            Ok(config) => serde_yaml::from_str(&config).context("Parsing config file")?,
            Err(e) if e.kind() == ErrorKind::NotFound && base_url.is_some() => Value::Null,
            Err(e) => return Err(e).with_context(|| format!("Reading config file {}", path)),
        };

        if let Some(base_url) = base_url {
            override_base_url(&mut value, base_url)?;
        }

        serde_yaml::from_value(value).context("Parsing config file")
    }
}

fn override_base_url(value: &mut Value, base_url: &Url) -> Result<()> {
    if value.is_null() {
        *value = Value::Mapping(Mapping::new());
    }
    let root = value
        .as_mapping_mut()
        .context("Config root must be a mapping")?;
    let backend = root
        .entry("backend".into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if backend.is_null() {
        *backend = Value::Mapping(Mapping::new());
    }
    backend
        .as_mapping_mut()
        .context("`backend` must be a mapping")?
        .insert("base_url".into(), base_url.as_str().into());
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct Backend {
    #[serde(deserialize_with = "deserialize_url")]
    pub base_url: Url,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Backend {
    /// Resolves `path` below the base url, treating the base path as a directory.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(path)
    }
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scanner {
    /// Case-insensitive substring a product name must contain to count as a scanner.
    pub product_filter: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "deserialize_path")]
    pub sysfs_root: Utf8PathBuf,
    #[serde(deserialize_with = "deserialize_path")]
    pub dev_root: Utf8PathBuf,
}

impl Default for Scanner {
    fn default() -> Self {
        Scanner {
            product_filter: "bar code scanner".to_string(),
            poll_interval: Duration::from_secs(2),
            sysfs_root: Utf8PathBuf::from("/sys/class/hidraw"),
            dev_root: Utf8PathBuf::from("/dev"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn path_of(file: &tempfile::NamedTempFile) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(file.path().to_path_buf()).unwrap()
    }

    #[test]
    fn reads_full_config() {
        let file = write_config(
            r#"
backend:
  base_url: https://attendance.example.org/api
  user_agent: kiosk-7
scanner:
  product_filter: honeywell
  poll_interval: 500ms
  sysfs_root: /tmp/hidraw
  dev_root: /tmp/dev
"#,
        );

        let config = Config::read(&path_of(&file), None).unwrap();
        assert_eq!(
            config.backend.base_url.as_str(),
            "https://attendance.example.org/api"
        );
        assert_eq!(config.backend.user_agent, "kiosk-7");
        assert_eq!(config.scanner.product_filter, "honeywell");
        assert_eq!(config.scanner.poll_interval, Duration::from_millis(500));
        assert_eq!(config.scanner.sysfs_root, "/tmp/hidraw");
        assert_eq!(config.scanner.dev_root, "/tmp/dev");
    }

    #[test]
    fn scanner_section_is_optional() {
        let file = write_config("backend:\n  base_url: http://localhost:8000\n");

        let config = Config::read(&path_of(&file), None).unwrap();
        assert_eq!(config.scanner.product_filter, "bar code scanner");
        assert_eq!(config.scanner.poll_interval, Duration::from_secs(2));
        assert!(config.backend.user_agent.starts_with("qr-checkin/"));
    }

    #[test]
    fn override_replaces_file_url() {
        let file = write_config("backend:\n  base_url: http://localhost:8000\n");
        let url = Url::parse("http://10.0.0.5:9000").unwrap();

        let config = Config::read(&path_of(&file), Some(&url)).unwrap();
        assert_eq!(config.backend.base_url, url);
    }

    #[test]
    fn missing_file_needs_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.yaml")).unwrap();

        assert!(Config::read(&path, None).is_err());

        let url = Url::parse("http://localhost:8000").unwrap();
        let config = Config::read(&path, Some(&url)).unwrap();
        assert_eq!(config.backend.base_url, url);
        assert_eq!(config.scanner.sysfs_root, "/sys/class/hidraw");
    }

    #[test]
    fn rejects_non_base_url() {
        let file = write_config("backend:\n  base_url: \"mailto:someone@example.org\"\n");
        assert!(Config::read(&path_of(&file), None).is_err());
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let backend = Backend {
            base_url: Url::parse("http://host:8000/api").unwrap(),
            user_agent: default_user_agent(),
        };
        assert_eq!(
            backend.endpoint("attendance/check").unwrap().as_str(),
            "http://host:8000/api/attendance/check"
        );

        let backend = Backend {
            base_url: Url::parse("http://host:8000").unwrap(),
            user_agent: default_user_agent(),
        };
        assert_eq!(
            backend.endpoint("attendance/check").unwrap().as_str(),
            "http://host:8000/attendance/check"
        );
    }
}
