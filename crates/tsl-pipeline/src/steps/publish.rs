use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use tsl_model::Tsl;
use tsl_types::{Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::registry::StepHandler;
use crate::sign::{FileSigner, Pkcs11Config, Pkcs11Signer, XmlSigner};
use crate::tree::TslTree;

/// `publish <dir> [cert key | pkcs11:<uri> key-label cert-label [key-id]]
/// [tree:territory|index]`: write the loaded documents to disk, optionally
/// signed.
pub struct PublishStep;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// How documents are laid out under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One file per legacy-stack entry.
    Flat,
    /// One directory per tree, named by root territory.
    TreeByTerritory,
    /// One directory per tree, named `tree-<i>`.
    TreeByIndex,
}

/// Signing material named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerSpec {
    Unsigned,
    Files { cert: PathBuf, key: PathBuf },
    Pkcs11(Pkcs11Config),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArgs {
    pub dir: PathBuf,
    pub layout: Layout,
    pub signer: SignerSpec,
}

impl PublishArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let (dir, rest) = args
            .split_first()
            .ok_or_else(|| TslError::MissingArgument("directory path".into()))?;
        let dir = validate_dir(dir)?;

        let mut layout = Layout::Flat;
        let mut signer_args = Vec::new();
        for arg in rest {
            match arg.strip_prefix("tree:") {
                Some("index") => layout = Layout::TreeByIndex,
                Some(_) => layout = Layout::TreeByTerritory,
                None => signer_args.push(arg.as_str()),
            }
        }

        let signer = match signer_args.as_slice() {
            [] => SignerSpec::Unsigned,
            [uri, key_label, cert_label, key_id @ ..] if uri.starts_with("pkcs11:") => {
                let config = Pkcs11Config::new(*uri, *key_label, *cert_label);
                SignerSpec::Pkcs11(match key_id {
                    [] => config,
                    [id] => config.with_key_id(*id),
                    _ => {
                        return Err(TslError::InvalidArguments(
                            "too many PKCS#11 arguments".into(),
                        ))
                    }
                })
            }
            [uri, ..] if uri.starts_with("pkcs11:") => {
                return Err(TslError::InvalidArguments(
                    "PKCS#11 signing requires a URI, key label and certificate label".into(),
                ))
            }
            [cert, key] => SignerSpec::Files {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            },
            other => {
                return Err(TslError::InvalidArguments(format!(
                    "expected a certificate and key file, got {} signing argument(s)",
                    other.len()
                )))
            }
        };

        Ok(Self {
            dir,
            layout,
            signer,
        })
    }
}

/// Reject NUL bytes and parent-directory components.
fn validate_dir(raw: &str) -> Result<PathBuf> {
    if raw.contains('\0') {
        return Err(TslError::InvalidArguments(
            "output directory contains a NUL byte".into(),
        ));
    }
    let path = PathBuf::from(raw);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(TslError::InvalidArguments(format!(
            "output directory must not contain '..': {raw}"
        )));
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// `name` if it can be used as a single path component under the output
/// directory. Document content decides these names, so separators, parent
/// references, NUL bytes and roots are refused.
fn safe_component(name: &str) -> Option<&str> {
    let unsafe_name = name.is_empty()
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
        || Path::new(name).has_root();
    (!unsafe_name).then_some(name)
}

/// Last segment of the first distribution point, else `tsl-<index>.xml`.
pub fn flat_file_name(tsl: &Tsl, index: usize) -> String {
    tsl.distribution_points()
        .first()
        .and_then(|uri| uri.trim_end_matches('/').rsplit('/').next())
        .and_then(safe_component)
        .map(String::from)
        .unwrap_or_else(|| format!("tsl-{index}.xml"))
}

fn write_document(path: &Path, tsl: &Tsl, signer: Option<&dyn XmlSigner>) -> Result<()> {
    let mut bytes = tsl.to_xml_bytes()?;
    if let Some(signer) = signer {
        bytes = signer.sign(&bytes)?;
    }
    std::fs::write(path, bytes)?;
    debug!(path = %path.display(), source = %tsl.source, "Wrote TSL");
    Ok(())
}

fn publish_flat(ctx: &Context, dir: &Path, signer: Option<&dyn XmlSigner>) -> Result<usize> {
    let mut written = 0;
    for (index, entry) in ctx.tsls.iter().enumerate() {
        let Some(tsl) = entry else {
            debug!(index, "Skipping empty TSL entry");
            continue;
        };
        write_document(&dir.join(flat_file_name(tsl, index)), tsl, signer)?;
        written += 1;
    }
    Ok(written)
}

/// Render the plain-text outline written as `index.txt`.
pub fn tree_index(tree: &TslTree) -> String {
    let mut out = String::from("TSL Tree Structure\n==================\n\n");
    if tree.is_empty() {
        out.push_str("Empty tree\n");
        return out;
    }
    tree.walk(|tsl, depth| {
        let _ = writeln!(
            out,
            "{}- {} ({}) Providers: {}",
            "  ".repeat(depth),
            tsl.territory().unwrap_or("unknown"),
            tsl.source,
            tsl.provider_count()
        );
    });
    out
}

fn publish_tree(
    tree: &TslTree,
    index: usize,
    dir: &Path,
    layout: Layout,
    signer: Option<&dyn XmlSigner>,
) -> Result<usize> {
    let fallback = format!("tree-{index}");
    let root_territory = tree
        .root_tsl()
        .and_then(|t| t.territory())
        .and_then(safe_component);
    let tree_dir = match (layout, root_territory) {
        (Layout::TreeByTerritory, Some(territory)) => dir.join(territory),
        _ => dir.join(&fallback),
    };
    std::fs::create_dir_all(&tree_dir)?;
    std::fs::write(tree_dir.join("index.txt"), tree_index(tree))?;

    let mut nodes: Vec<(&Arc<Tsl>, usize)> = Vec::new();
    tree.walk(|tsl, depth| nodes.push((tsl, depth)));

    let mut written = 0;
    for (ordinal, (tsl, depth)) in nodes.into_iter().enumerate() {
        let path = if depth == 0 {
            let name = tsl.territory().and_then(safe_component).unwrap_or(&fallback);
            tree_dir.join(format!("{name}.xml"))
        } else {
            let refs = tree_dir.join(format!("refs-{depth}"));
            std::fs::create_dir_all(&refs)?;
            let name = match tsl.territory().and_then(safe_component) {
                Some(territory) => format!("depth-{depth}-{territory}.xml"),
                None => format!("depth-{depth}-{ordinal}.xml"),
            };
            refs.join(name)
        };
        write_document(&path, tsl, signer)?;
        written += 1;
    }
    Ok(written)
}

fn build_signer<'a>(
    pipeline: &'a Pipeline,
    spec: &SignerSpec,
) -> Result<Option<Box<dyn XmlSigner + 'a>>> {
    let signer: Box<dyn XmlSigner + 'a> = match spec {
        SignerSpec::Unsigned => return Ok(None),
        SignerSpec::Files { cert, key } => Box::new(FileSigner::from_files(cert, key)?),
        SignerSpec::Pkcs11(config) => {
            let provider = pipeline
                .pkcs11()
                .ok_or_else(|| TslError::signing("no PKCS#11 provider configured"))?;
            Box::new(Pkcs11Signer::new(provider, config.clone()))
        }
    };
    Ok(Some(signer))
}

#[async_trait]
impl StepHandler for PublishStep {
    fn step_name(&self) -> &str {
        "publish"
    }

    async fn execute(&self, pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let args = PublishArgs::parse(args)?;
        let dir = &args.dir;

        if dir.exists() && !dir.is_dir() {
            return Err(TslError::NotADirectory(dir.clone()));
        }
        if ctx.tsls.is_empty() && ctx.trees.is_empty() {
            return Err(TslError::NothingTo("publish".into()));
        }

        let count = ctx.tsls.iter().flatten().count();
        let wrap = |source: TslError| TslError::Publish {
            path: dir.clone(),
            count,
            source: Box::new(source),
        };

        std::fs::create_dir_all(dir).map_err(|e| wrap(e.into()))?;
        let signer = build_signer(pipeline, &args.signer).map_err(wrap)?;
        let signer = signer.as_deref();

        let written = match args.layout {
            Layout::Flat => publish_flat(ctx, dir, signer),
            layout => {
                let fallback: Vec<TslTree>;
                let trees = if ctx.trees.is_empty() {
                    fallback = ctx
                        .documents()
                        .into_iter()
                        .map(|tsl| TslTree::new(Some(tsl)))
                        .collect();
                    &fallback
                } else {
                    &ctx.trees
                };
                trees.iter().enumerate().try_fold(0, |total, (i, tree)| {
                    Ok::<_, TslError>(total + publish_tree(tree, i, dir, layout, signer)?)
                })
            }
        }
        .map_err(wrap)?;

        info!(
            dir = %dir.display(),
            written,
            layout = ?args.layout,
            signed = signer.is_some(),
            "Published TSLs"
        );
        Ok(())
    }
}
