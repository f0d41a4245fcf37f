use clap::Parser;
use stac_tree_lib::{Config, FingerprintOptions};

/// Environment variable consulted when no root is given on the command line
pub const ROOT_ENV: &str = "STAC_TREE_ROOT";

/// Root used when neither the command line nor the environment names one
pub const DEFAULT_ROOT: &str = "../stac/catalog.json";

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// STAC Tree Browser - Browse a linked STAC catalog as a lazily loaded, searchable tree
pub struct Settings {
    /// Root catalog URL or path (default: $STAC_TREE_ROOT, then ../stac/catalog.json)
    #[clap(value_name = "ROOT")]
    pub root: Option<String>,

    /// Free-text query; only matches and their ancestors are shown
    #[clap(short, long, default_value = "")]
    pub query: String,

    /// Expand the Collection (or open the Catalog) with this id; may be repeated
    #[clap(short, long, value_name = "ID")]
    pub expand: Vec<String>,

    /// Expand every Collection in the tree
    #[clap(long)]
    pub expand_all: bool,

    /// Include keywords in the searchable text
    #[clap(long)]
    pub keywords: bool,

    /// Include provider names in the searchable text
    #[clap(long)]
    pub providers: bool,

    /// Exclude Catalog and Collection descriptions from the searchable text
    #[clap(long)]
    pub no_container_description: bool,

    /// Catalogs nested this deep are not descended
    #[clap(long, default_value = "32")]
    pub max_depth: usize,

    /// Catalogs at this depth or shallower start open
    #[clap(long, default_value = "1")]
    pub open_depth: usize,

    /// Print the outline as JSON instead of text
    #[clap(long)]
    pub json: bool,

    /// Also print nodes hidden by the query
    #[clap(long)]
    pub show_hidden: bool,

    /// Print descriptions, providers, related links, bounds and assets under each node
    #[clap(long)]
    pub details: bool,

    /// HTTP request timeout in seconds
    #[clap(long, default_value = "30")]
    pub timeout_secs: u64,
}

impl Settings {
    /// Parse the command line, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Root reference to load
    pub fn root_reference(&self) -> String {
        self.root_reference_with(get_env(ROOT_ENV))
    }

    fn root_reference_with(&self, from_env: Option<String>) -> String {
        self.root
            .clone()
            .or(from_env)
            .unwrap_or_else(|| DEFAULT_ROOT.to_string())
    }

    /// Tree configuration derived from the flags
    pub fn tree_config(&self) -> Config {
        Config {
            fingerprint: FingerprintOptions {
                container_description: !self.no_container_description,
                keywords: self.keywords,
                providers: self.providers,
            },
            max_depth: self.max_depth,
            open_depth: self.open_depth,
            ..Config::default()
        }
    }
}

/// Generic function to get environment variable, parsing it to the desired type.
pub fn get_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
