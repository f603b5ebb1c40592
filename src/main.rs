use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use git_drs::cli::{Args, Command};
use git_drs::config::{AnvilAuth, AnvilRemote, Config, Gen3Auth, Gen3Remote, Remote};
use git_drs::engine::{self, AddUrlRequest};
use git_drs::error::{Error, Result};
use git_drs::indexd::DrsClient;
use git_drs::s3::{self, ProbeOptions};
use git_drs::store::ObjectStore;
use git_drs::lfs;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        if e.is_retryable() {
            eprintln!("this looks transient; re-running the command may succeed");
        }
        std::process::exit(1);
    }
}

/// Working-repo state every subcommand (except init) needs.
struct RepoContext {
    root: PathBuf,
    store: ObjectStore,
    config: Config,
}

async fn repo_context() -> Result<RepoContext> {
    let cwd = PathBuf::from(".");
    let root = lfs::repo_root(&cwd).await?;
    let git_dir = lfs::git_dir(&root).await?;
    let store = ObjectStore::open(&git_dir)?;
    let config = Config::load(&root)?;
    Ok(RepoContext {
        root,
        store,
        config,
    })
}

fn client_for(config: &Config, name: Option<&str>) -> Result<DrsClient> {
    let (_, remote) = config.remote(name)?;
    remote.client()
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Init {
            endpoint,
            project_id,
            bucket,
            profile,
            remote,
        } => {
            let cwd = PathBuf::from(".");
            let root = lfs::repo_root(&cwd).await?;
            let git_dir = lfs::git_dir(&root).await?;
            ObjectStore::open(&git_dir)?;

            let mut config = if Config::path(&root).exists() {
                Config::load(&root)?
            } else {
                Config::default()
            };
            match (endpoint, project_id, bucket) {
                (Some(endpoint), Some(project_id), Some(bucket)) => {
                    config.set_remote(
                        &remote,
                        Remote::Gen3(Gen3Remote {
                            endpoint,
                            auth: Gen3Auth {
                                profile,
                                project_id,
                                bucket,
                            },
                        }),
                        false,
                    );
                }
                (None, None, None) => {}
                _ => {
                    return Err(Error::InvalidInput(
                        "an initial remote needs --endpoint, --project-id, and --bucket together"
                            .to_string(),
                    ));
                }
            }
            config.save(&root)?;
            eprintln!("initialized DRS tracking in {}", root.display());
            Ok(())
        }

        Command::SetRemote {
            name,
            endpoint,
            project_id,
            bucket,
            profile,
            terra_project,
            default,
        } => {
            let ctx = repo_context().await?;
            let descriptor = match (terra_project, project_id, bucket) {
                (Some(terra_project), _, _) => Remote::Anvil(AnvilRemote {
                    endpoint,
                    auth: AnvilAuth { terra_project },
                }),
                (None, Some(project_id), Some(bucket)) => Remote::Gen3(Gen3Remote {
                    endpoint,
                    auth: Gen3Auth {
                        profile,
                        project_id,
                        bucket,
                    },
                }),
                _ => {
                    return Err(Error::InvalidInput(
                        "a gen3 remote needs --project-id and --bucket \
                         (or --terra-project for anvil)"
                            .to_string(),
                    ));
                }
            };
            let mut config = ctx.config;
            config.set_remote(&name, descriptor, default);
            config.save(&ctx.root)?;
            eprintln!("remote '{name}' saved");
            Ok(())
        }

        Command::AddUrl {
            s3_url,
            sha256,
            aws_access_key_id,
            aws_secret_access_key,
            region,
            endpoint_url,
            remote,
        } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let request = AddUrlRequest {
                s3_url,
                sha256,
                options: ProbeOptions {
                    access_key: aws_access_key_id,
                    secret_key: aws_secret_access_key,
                    region,
                    endpoint: endpoint_url,
                },
            };
            let outcome = engine::add_url(
                &ctx.root,
                &client,
                &ctx.store,
                &request,
                s3::ProbeOverrides::default(),
            )
            .await?;
            match outcome {
                engine::AddUrlOutcome::Unchanged => eprintln!("url already attached"),
                engine::AddUrlOutcome::Updated => eprintln!("url appended to existing record"),
                engine::AddUrlOutcome::Created => eprintln!("new record registered"),
            }
            Ok(())
        }

        Command::Prepare {
            git_remote,
            remote_url,
            remote,
            refs,
        } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let refs = if refs.is_empty() {
                vec!["HEAD".to_string()]
            } else {
                refs
            };
            let files = lfs::files_for_push(
                &ctx.root,
                &git_remote,
                remote_url.as_deref(),
                &refs,
                &ctx.store,
            )
            .await?;
            let stats = engine::prepare_all(&client, &ctx.store, &files).await?;
            eprintln!(
                "prepared {} objects ({} already known)",
                stats.completed, stats.skipped
            );
            Ok(())
        }

        Command::Register { stage, remote } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let stats = engine::push_pending(&ctx.root, &client, &ctx.store, stage).await?;
            eprintln!(
                "registered {} objects ({} already on the remote)",
                stats.completed, stats.skipped
            );
            Ok(())
        }

        Command::Check { path } => {
            let cwd = PathBuf::from(".");
            let root = lfs::repo_root(&cwd).await?;
            match lfs::check_lfs_file(&root, &path).await? {
                Some(info) => {
                    println!("{}\t{}\t{}", info.oid, info.size, info.name);
                    Ok(())
                }
                None => Err(Error::Environment(format!(
                    "'{path}' is not an LFS-tracked file; run `git lfs track` and re-add it"
                ))),
            }
        }

        Command::Purge { oids } => {
            let cwd = PathBuf::from(".");
            let root = lfs::repo_root(&cwd).await?;
            let git_dir = lfs::git_dir(&root).await?;
            let store = ObjectStore::open(&git_dir)?;
            let dropped = engine::purge(&store, &oids)?;
            eprintln!("dropped {dropped} local records");
            Ok(())
        }

        Command::Pull { project, remote } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let project = project.unwrap_or_else(|| client.project_id().to_string());
            let stats = engine::pull_project(&ctx.root, &client, &ctx.store, &project).await?;
            eprintln!("pulled {} records", stats.completed);
            Ok(())
        }

        Command::List { remote } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let mut objects = client.list_objects();
            while let Some(item) = objects.recv().await {
                let object = item?;
                println!(
                    "{}\t{}\t{}",
                    object.id,
                    object.size,
                    object.name.unwrap_or_default()
                );
            }
            Ok(())
        }

        Command::ListProject { project_id, remote } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            for record in client.list_records_by_project(&project_id).await? {
                println!(
                    "{}\t{}\t{}",
                    record.did,
                    record.size,
                    record.file_name.unwrap_or_default()
                );
            }
            Ok(())
        }

        Command::Get { did, remote } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            let object = client.get_object(&did).await?;
            println!("id\t{}", object.id);
            println!("name\t{}", object.name.unwrap_or_default());
            println!("size\t{}", object.size);
            for checksum in &object.checksums {
                println!("{}\t{}", checksum.kind, checksum.checksum);
            }
            for method in &object.access_methods {
                println!(
                    "access\t{}\t{}",
                    method.kind,
                    method.access_id.clone().unwrap_or_default()
                );
            }
            Ok(())
        }

        Command::SignedUrl {
            did,
            access_id,
            remote,
        } => {
            let ctx = repo_context().await?;
            let client = client_for(&ctx.config, remote.as_deref())?;
            println!("{}", client.get_download_url(&did, &access_id).await?);
            Ok(())
        }
    }
}
