//! Command line interface.

use crate::config::{Config, DirLayout};
use chrono::NaiveDateTime;
use clap::Parser;
use std::path::PathBuf;

/// Select satellite acquisitions over each AOI and write one georeferenced mosaic per acquisition.
#[derive(Parser, Debug, Clone)]
#[command(name = "wmtsx", author, version, about, long_about = None)]
pub struct Cli {
    /// YAML configuration file
    pub config_file: PathBuf,

    /// Zoom level (1-20)
    pub zoom: u8,

    /// Root directory for output files
    pub out_path: PathBuf,

    /// Start acquisition datetime (DD/MM/YYYY HH:MM:SS or ISO-8601)
    #[arg(short, long, alias = "start_datetime", value_parser = parse_datetime_arg)]
    pub start_datetime: Option<NaiveDateTime>,

    /// End acquisition datetime; a bare date includes that whole day
    #[arg(short, long, alias = "end_datetime", value_parser = parse_end_datetime_arg)]
    pub end_datetime: Option<NaiveDateTime>,

    /// Maximum cloud cover fraction
    #[arg(short = 'c', long, alias = "max_cloud")]
    pub max_cloud: Option<f64>,

    /// Feature identifiers to download; all other filters are ignored
    #[arg(short, long, num_args = 1..)]
    pub features: Vec<String>,

    /// Minimum percentage overlap with the AOI
    #[arg(short, long)]
    pub overlap: Option<f64>,

    /// Only process these AOIs
    #[arg(short, long, num_args = 1..)]
    pub aois: Vec<String>,

    /// Allowed platforms
    #[arg(short, long, num_args = 1..)]
    pub platforms: Vec<String>,

    /// Maximum resolution in metres
    #[arg(short = 'r', long, alias = "max_resolution")]
    pub max_resolution: Option<f64>,

    /// Period/resolution decision table (YAML)
    #[arg(long, alias = "period_resolution")]
    pub period_resolution: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(long)]
    pub overwrite: bool,

    /// Print the selected features and exit
    #[arg(long, alias = "info_only")]
    pub info_only: bool,

    /// Maximum downloads per AOI
    #[arg(long, alias = "max_downloads")]
    pub max_downloads: Option<usize>,

    /// Output directory layout
    #[arg(long, value_enum)]
    pub dirs: Option<DirLayout>,

    /// Output image format (GTiff, PNG, JPEG)
    #[arg(long)]
    pub format: Option<String>,

    /// Output creation options, e.g. "TILED=YES COMPRESS=LZW"
    #[arg(long)]
    pub options: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_datetime_arg(s: &str) -> Result<NaiveDateTime, String> {
    wmtsx_catalog::parse_datetime(s).map_err(|e| e.to_string())
}

fn parse_end_datetime_arg(s: &str) -> Result<NaiveDateTime, String> {
    wmtsx_catalog::parse_end_datetime(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Apply command line values on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        let filter = &mut config.filter;
        if self.start_datetime.is_some() {
            filter.start_datetime = self.start_datetime;
        }
        if self.end_datetime.is_some() {
            filter.end_datetime = self.end_datetime;
        }
        if self.max_cloud.is_some() {
            filter.max_cloud = self.max_cloud;
        }
        if self.max_resolution.is_some() {
            filter.max_resolution = self.max_resolution;
        }
        if self.overlap.is_some() {
            filter.min_overlap = self.overlap;
        }
        if self.max_downloads.is_some() {
            filter.max_downloads = self.max_downloads;
        }
        if !self.features.is_empty() {
            filter.features = self.features.clone();
        }
        if !self.platforms.is_empty() {
            filter.platforms = self.platforms.clone();
        }

        if self.period_resolution.is_some() {
            config.period_resolution = self.period_resolution.clone();
        }

        let output = &mut config.output;
        if self.overwrite {
            output.overwrite = true;
        }
        if let Some(dirs) = self.dirs {
            output.dirs = dirs;
        }
        if let Some(format) = &self.format {
            output.format = format.clone();
        }
        if let Some(options) = &self.options {
            output.options = options.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_underscore_style_arguments() {
        let cli = Cli::try_parse_from([
            "wmtsx",
            "cfg.yml",
            "17",
            "/data/out",
            "-s",
            "01/06/2018 00:00:00",
            "--end_datetime",
            "2019-06-01",
            "-c",
            "0.1",
            "-p",
            "WorldView-02",
            "WorldView-03",
            "--max_downloads",
            "4",
            "--info_only",
            "--dirs",
            "platform-first",
        ])
        .unwrap();

        assert_eq!(cli.zoom, 17);
        assert_eq!(cli.start_datetime.unwrap().to_string(), "2018-06-01 00:00:00");
        assert_eq!(cli.end_datetime.unwrap().to_string(), "2019-06-01 23:59:59.999999999");
        assert_eq!(cli.platforms, vec!["WorldView-02", "WorldView-03"]);
        assert_eq!(cli.max_downloads, Some(4));
        assert!(cli.info_only);
        assert_eq!(cli.dirs, Some(DirLayout::PlatformFirst));
    }

    #[test]
    fn test_bad_datetime_is_rejected() {
        assert!(Cli::try_parse_from(["wmtsx", "cfg.yml", "17", "out", "-s", "yesterday"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_yaml_str(
            r#"
aoi: { pathname: sites.geojson }
endpoint:
  name: basemap
  catalogue: { kind: basemap }
  tiles: https://example.test/{z}/{x}/{y}.png
filter:
  max_cloud: 0.5
  max_downloads: 10
"#,
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "wmtsx", "cfg.yml", "15", "out", "-c", "0.2", "-f", "abc", "--format", "PNG", "--overwrite",
        ])
        .unwrap();
        cli.apply_overrides(&mut config);

        assert_eq!(config.filter.max_cloud, Some(0.2));
        assert_eq!(config.filter.max_downloads, Some(10));
        assert_eq!(config.filter.features, vec!["abc"]);
        assert_eq!(config.output.format, "PNG");
        assert!(config.output.overwrite);
    }
}
