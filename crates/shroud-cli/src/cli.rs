use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "shroud",
    version,
    about = "Encrypt selected files on their way to a git remote",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $SHROUD_CONFIG              (environment variable)

Environment variables:
  SHROUD_CONFIG       Path to configuration file
  SHROUD_PASSPHRASE   Site secret, used when the config names neither a
                      passphrase nor a passcommand"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides SHROUD_CONFIG)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Print the key trait of the configured secret for this site
    KeyTrait,

    /// Encrypt local branches, tags and HEAD into refs/staged-out/
    Tauten {
        /// Leave tags alone
        #[arg(long)]
        no_tags: bool,

        /// Drop every recorded oid mapping first and rebuild from scratch
        #[arg(long)]
        rebuild: bool,
    },

    /// Decrypt fetched branches and tags into refs/staged-in/
    Regain {
        /// Leave tags alone
        #[arg(long)]
        no_tags: bool,

        /// Check that a staged-in ref carries the expected oid, as
        /// `<ref>=<oid>`; may be repeated
        #[arg(long = "expect", value_name = "REF=OID")]
        expect: Vec<String>,
    },

    /// Make pushed refs/staged-out/ refs the mirror's own refs and HEAD
    Promote,

    /// Decode one ciphertext blob and describe its envelope
    Reveal {
        /// Ciphertext blob oid (full hex)
        oid: String,

        /// Write the decoded plaintext to stdout instead of a summary
        #[arg(long)]
        raw: bool,
    },
}

impl Commands {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::KeyTrait => "key-trait",
            Self::Tauten { .. } => "tauten",
            Self::Regain { .. } => "regain",
            Self::Promote => "promote",
            Self::Reveal { .. } => "reveal",
        }
    }
}
