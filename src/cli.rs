use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "git-drs",
    about = "Bridge Git LFS tracking with a Gen3/Indexd DRS catalog",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create .drs/config.yaml and the local DRS object store
    Init {
        /// Gen3 endpoint URL for the initial remote
        #[arg(long)]
        endpoint: Option<String>,

        /// Project id as <program>-<project>
        #[arg(long)]
        project_id: Option<String>,

        /// Default upload bucket
        #[arg(long)]
        bucket: Option<String>,

        /// Auth profile name
        #[arg(long, default_value = "default")]
        profile: String,

        /// Name for the initial remote
        #[arg(long, default_value = "origin")]
        remote: String,
    },

    /// Add or update a remote descriptor in .drs/config.yaml
    SetRemote {
        name: String,

        #[arg(long)]
        endpoint: String,

        /// Gen3 project id as <program>-<project>
        #[arg(long)]
        project_id: Option<String>,

        /// Gen3 default upload bucket
        #[arg(long)]
        bucket: Option<String>,

        /// Gen3 auth profile name
        #[arg(long, default_value = "default")]
        profile: String,

        /// Terra project — makes this an AnVIL remote
        #[arg(long, conflicts_with_all = ["project_id", "bucket"])]
        terra_project: Option<String>,

        /// Make this the default remote
        #[arg(long)]
        default: bool,
    },

    /// Attach an external S3 URL to a DRS record
    AddUrl {
        s3_url: String,
        sha256: String,

        #[arg(long)]
        aws_access_key_id: Option<String>,

        #[arg(long)]
        aws_secret_access_key: Option<String>,

        #[arg(long)]
        region: Option<String>,

        #[arg(long)]
        endpoint_url: Option<String>,

        #[arg(long)]
        remote: Option<String>,
    },

    /// Prepare DRS records for the LFS files a push would transfer
    Prepare {
        /// Git remote whose pushlist to inspect
        #[arg(long, default_value = "origin")]
        git_remote: String,

        /// Remote URL override passed through to git-lfs
        #[arg(long)]
        remote_url: Option<String>,

        #[arg(long)]
        remote: Option<String>,

        /// Refs to inspect (defaults to HEAD)
        refs: Vec<String>,
    },

    /// Register pending local records with the remote index
    Register {
        /// Also synthesize and stage LFS pointer files
        #[arg(long)]
        stage: bool,

        #[arg(long)]
        remote: Option<String>,
    },

    /// Report whether a path is LFS-tracked and show its OID and size
    Check { path: String },

    /// Drop local DRS records (the remote index is left untouched)
    Purge {
        /// OIDs to drop; with none given, every pending record is dropped
        oids: Vec<String>,
    },

    /// Mirror a project's remote records into the local store
    Pull {
        /// Project id (defaults to the remote's configured project)
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        remote: Option<String>,
    },

    /// List every DRS object on the remote
    List {
        #[arg(long)]
        remote: Option<String>,
    },

    /// List Indexd records for a project
    ListProject {
        project_id: String,

        #[arg(long)]
        remote: Option<String>,
    },

    /// Show one DRS object as JSON-ish summary lines
    Get {
        did: String,

        #[arg(long)]
        remote: Option<String>,
    },

    /// Print a signed download URL for an object
    SignedUrl {
        did: String,

        #[arg(default_value = "s3")]
        access_id: String,

        #[arg(long)]
        remote: Option<String>,
    },
}
