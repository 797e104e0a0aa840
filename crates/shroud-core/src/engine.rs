//! The engine: two stores, one mapping store and the ref-level operations a
//! remote helper drives.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::mapping::MappingStore;
use crate::policy::PolicyResolver;
use crate::store::{GitStore, ObjectStore};
use crate::transform::blob::delta_base;
use crate::transform::{TransformStats, Transformer};
use shroud_crypto::envelope;
use shroud_crypto::{Compression, EnvelopeCodec, SiteKey};
use shroud_types::error::{Result, ShroudError};
use shroud_types::{Direction, ObjectKind, Oid};

const HEADS: &str = "refs/heads/";
const TAGS: &str = "refs/tags/";
const STAGED_OUT_HEAD: &str = "refs/staged-out/HEAD";

/// Settings the engine needs besides stores and key.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub site_id: String,
    /// Persisted key trait to check the key against.
    pub key_trait: Option<String>,
    pub compression: Compression,
    /// Site-level attribute lines.
    pub attribute_rules: Vec<String>,
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            site_id: config.site.id.clone(),
            key_trait: config.site.key_trait.clone(),
            compression: config.compression.compression()?,
            attribute_rules: config.attributes.rules.clone(),
        })
    }
}

/// One ref written into a staging namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRef {
    /// Source-store ref name.
    pub name: String,
    /// Staging ref name in the ciphertext store.
    pub staged: String,
    pub source: Oid,
    pub target: Oid,
}

/// What [`Engine::reveal`] learned about one ciphertext blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    pub oid: Oid,
    pub version: u8,
    pub compressed: bool,
    pub payload_len: u64,
    pub extra_len: usize,
    /// Cipher oid of the blob this one is a delta against.
    pub delta_base: Option<Oid>,
    /// Oid the plaintext has (or would have) in the plaintext store.
    pub plain_oid: Oid,
    pub plaintext: Vec<u8>,
}

/// Name of `name` inside the staging namespace of `direction`.
fn staged_name(direction: Direction, name: &str) -> Result<String> {
    let rest = if name == "HEAD" {
        name
    } else {
        name.strip_prefix("refs/").ok_or_else(|| {
            ShroudError::Other(format!("cannot stage '{name}': not under refs/"))
        })?
    };
    Ok(format!("{}{rest}", direction.staging_prefix()))
}

pub struct Engine<P, C> {
    transformer: Transformer<P, C>,
    site_id: String,
}

impl Engine<GitStore, GitStore> {
    /// Open both repositories named by `config` and initialize an engine.
    pub fn open(config: &EngineConfig, key: &SiteKey) -> Result<Self> {
        let plain = GitStore::open(&config.site.plain_store)?;
        let cipher = GitStore::open(&config.site.cipher_store)?;
        if config.site.alternates {
            cipher.add_alternate(&plain.objects_dir())?;
        }
        let options = EngineOptions::from_config(config)?;
        Self::initialize(plain, cipher, &config.site.mapping_path, key, options)
    }
}

impl<P: ObjectStore, C: ObjectStore> Engine<P, C> {
    /// Bind two open stores. Fails with `KeyTraitMismatch` before anything
    /// is opened when `options.key_trait` does not match `key`.
    pub fn initialize(
        plain: P,
        cipher: C,
        mapping_path: &Path,
        key: &SiteKey,
        options: EngineOptions,
    ) -> Result<Self> {
        if let Some(stored) = &options.key_trait {
            key.verify_trait(&options.site_id, stored)?;
        }
        let mapping = MappingStore::open(mapping_path)?;
        let transformer = Transformer::new(
            plain,
            cipher,
            mapping,
            EnvelopeCodec::new(key),
            PolicyResolver::new(&options.attribute_rules),
            options.compression,
        );
        info!(site = %options.site_id, mapping = %mapping_path.display(), "engine initialized");
        Ok(Self {
            transformer,
            site_id: options.site_id,
        })
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn plain(&self) -> &P {
        self.transformer.plain()
    }

    pub fn cipher(&self) -> &C {
        self.transformer.cipher()
    }

    pub fn mapping(&self) -> &MappingStore {
        self.transformer.mapping()
    }

    pub fn stats(&self) -> TransformStats {
        self.transformer.stats()
    }

    pub fn transform_commit(&self, oid: &Oid, direction: Direction) -> Result<Oid> {
        self.transformer.transform_commit(oid, direction)
    }

    /// Transform a commit, tag or root tree, whichever `oid` names.
    pub fn transform_object(&self, oid: &Oid, direction: Direction) -> Result<Oid> {
        self.transformer.transform_object(oid, direction)
    }

    /// Stage every local branch under `refs/staged-out/heads/`. The staged
    /// branches become the outbound batch.
    pub fn tauten_heads(&self) -> Result<Vec<StagedRef>> {
        let batch = self.stage_namespace(Direction::Tauten, HEADS)?;
        self.record_outbound(&batch, None)?;
        Ok(batch)
    }

    /// Stage every local tag under `refs/staged-out/tags/`. The staged tags
    /// become the outbound batch.
    pub fn tauten_tags(&self) -> Result<Vec<StagedRef>> {
        let batch = self.stage_namespace(Direction::Tauten, TAGS)?;
        self.record_outbound(&batch, None)?;
        Ok(batch)
    }

    /// Stage the local HEAD. A symbolic HEAD stages its branch and makes
    /// `refs/staged-out/HEAD` point at it; a detached HEAD is staged as
    /// `refs/staged-out/HEAD` itself; an unborn HEAD stages nothing. What
    /// was staged becomes the outbound batch.
    pub fn tauten_head(&self) -> Result<Option<StagedRef>> {
        let head = self.stage_head()?;
        self.record_outbound(&[], head.as_ref())?;
        Ok(head)
    }

    /// Stage branches, tags when `tags` is set, and HEAD as one outbound
    /// batch.
    pub fn tauten_all(&self, tags: bool) -> Result<(Vec<StagedRef>, Option<StagedRef>)> {
        let mut staged = self.stage_namespace(Direction::Tauten, HEADS)?;
        if tags {
            staged.extend(self.stage_namespace(Direction::Tauten, TAGS)?);
        }
        let head = self.stage_head()?;
        self.record_outbound(&staged, head.as_ref())?;
        Ok((staged, head))
    }

    fn stage_head(&self) -> Result<Option<StagedRef>> {
        let plain = self.transformer.plain();
        let cipher = self.transformer.cipher();
        let branch = plain.symbolic_target("HEAD")?;
        let name = branch.clone().unwrap_or_else(|| "HEAD".to_string());
        let Some(source) = plain.reference(&name)? else {
            debug!(head = %name, "HEAD is unborn, nothing to stage");
            return Ok(None);
        };

        let target = self.transformer.transform_object(&source, Direction::Tauten)?;
        let staged = staged_name(Direction::Tauten, &name)?;
        cipher.set_reference(&staged, &target, "shroud: stage HEAD")?;
        if branch.is_some() {
            cipher.set_symbolic_reference(STAGED_OUT_HEAD, &staged, "shroud: stage HEAD")?;
        }
        info!(head = %name, %source, %target, "staged HEAD");
        Ok(Some(StagedRef {
            name,
            staged,
            source,
            target,
        }))
    }

    /// Remember `staged` (and HEAD, if staged) as the refs
    /// `update_destination_head` promotes.
    fn record_outbound(&self, staged: &[StagedRef], head: Option<&StagedRef>) -> Result<()> {
        let mut names: Vec<String> = staged.iter().map(|s| s.staged.clone()).collect();
        if let Some(head) = head {
            if !names.contains(&head.staged) {
                names.push(head.staged.clone());
            }
            if head.staged != STAGED_OUT_HEAD {
                names.push(STAGED_OUT_HEAD.to_string());
            }
        }
        debug!(refs = names.len(), "recorded outbound batch");
        self.mapping().record_outbound_batch(&names)
    }

    /// Stage every fetched branch under `refs/staged-in/heads/`.
    pub fn regain_heads(&self) -> Result<Vec<StagedRef>> {
        self.stage_namespace(Direction::Regain, HEADS)
    }

    /// Stage every fetched tag under `refs/staged-in/tags/`.
    pub fn regain_tags(&self) -> Result<Vec<StagedRef>> {
        self.stage_namespace(Direction::Regain, TAGS)
    }

    /// Transform the given plaintext refs and stage them under
    /// `refs/staged-out/` as the new outbound batch. Nothing is staged
    /// unless every transform succeeds.
    pub fn stage_outbound_refs(&self, refs: &[(String, Oid)]) -> Result<Vec<StagedRef>> {
        let batch = self.stage_refs(Direction::Tauten, refs)?;
        self.record_outbound(&batch, None)?;
        Ok(batch)
    }

    /// Transform the given ciphertext refs and stage them under
    /// `refs/staged-in/`. Nothing is staged unless every transform succeeds.
    pub fn stage_inbound_refs(&self, refs: &[(String, Oid)]) -> Result<Vec<StagedRef>> {
        self.stage_refs(Direction::Regain, refs)
    }

    fn stage_refs(&self, direction: Direction, refs: &[(String, Oid)]) -> Result<Vec<StagedRef>> {
        let mut batch = Vec::with_capacity(refs.len());
        for (name, source) in refs {
            let target = self.transformer.transform_object(source, direction)?;
            batch.push(StagedRef {
                name: name.clone(),
                staged: staged_name(direction, name)?,
                source: *source,
                target,
            });
        }

        let cipher = self.transformer.cipher();
        let message = format!("shroud: {direction}");
        for staged in &batch {
            cipher.set_reference(&staged.staged, &staged.target, &message)?;
        }
        Ok(batch)
    }

    /// Stage every ref under `prefix` in the source store, then remove
    /// staged refs whose source ref is gone.
    fn stage_namespace(&self, direction: Direction, prefix: &str) -> Result<Vec<StagedRef>> {
        let refs = match direction {
            Direction::Tauten => self.transformer.plain().references(prefix)?,
            Direction::Regain => self.transformer.cipher().references(prefix)?,
        };
        let batch = self.stage_refs(direction, &refs)?;

        let cipher = self.transformer.cipher();
        let namespace = staged_name(direction, prefix)?;
        for (name, _) in cipher.references(&namespace)? {
            if !batch.iter().any(|s| s.staged == name) {
                cipher.delete_reference(&name)?;
                debug!(staged = %name, "dropped stale staged ref");
            }
        }
        info!(%direction, namespace = %namespace, refs = batch.len(), "staged refs");
        Ok(batch)
    }

    /// Check that the oid a fetch asks for under `name` is the one staged
    /// for it by the last regain.
    pub fn confirm_fetch(&self, name: &str, requested: &Oid) -> Result<()> {
        let staged = staged_name(Direction::Regain, name)?;
        match self.transformer.cipher().reference(&staged)? {
            Some(computed) if computed == *requested => Ok(()),
            Some(computed) => Err(ShroudError::RequestedOidMismatch {
                name: name.to_string(),
                requested: *requested,
                computed,
            }),
            None => Err(ShroudError::Other(format!(
                "nothing is staged for '{name}'"
            ))),
        }
    }

    /// After a successful push of the last outbound batch, make its refs
    /// the ciphertext store's own and, when HEAD was part of it, point the
    /// ciphertext HEAD the way the staged HEAD points. Refs staged by
    /// earlier batches are left alone. Returns the promoted ref names.
    pub fn update_destination_head(&self) -> Result<Vec<String>> {
        let cipher = self.transformer.cipher();
        let prefix = Direction::Tauten.staging_prefix();
        let message = "shroud: promote staged ref";

        let batch = self.mapping().outbound_batch()?;
        let mut promoted = Vec::new();
        for name in batch.iter().filter(|n| n.as_str() != STAGED_OUT_HEAD) {
            let rest = name.strip_prefix(prefix).ok_or_else(|| {
                ShroudError::Other(format!("'{name}' is not a staged outbound ref"))
            })?;
            let oid = cipher.reference(name)?.ok_or_else(|| {
                ShroudError::Other(format!("staged ref '{name}' has disappeared"))
            })?;
            let destination = format!("refs/{rest}");
            cipher.set_reference(&destination, &oid, message)?;
            promoted.push(destination);
        }
        if batch.iter().any(|n| n == STAGED_OUT_HEAD) {
            match cipher.symbolic_target(STAGED_OUT_HEAD)? {
                Some(target) => {
                    let rest = target.strip_prefix(prefix).ok_or_else(|| {
                        ShroudError::Other(format!("staged HEAD points outside staging: {target}"))
                    })?;
                    cipher.set_symbolic_reference("HEAD", &format!("refs/{rest}"), message)?;
                }
                None => {
                    let oid = cipher.reference(STAGED_OUT_HEAD)?.ok_or_else(|| {
                        ShroudError::Other("staged HEAD has disappeared".into())
                    })?;
                    cipher.set_reference("HEAD", &oid, message)?;
                }
            }
            promoted.push("HEAD".to_string());
        }
        info!(refs = promoted.len(), "promoted staged refs");
        Ok(promoted)
    }

    /// Decode one ciphertext blob in memory. Writes nothing.
    pub fn reveal(&self, oid: &Oid) -> Result<Reveal> {
        let data = self
            .transformer
            .cipher()
            .read_kind(oid, ObjectKind::Blob)?;
        let info = envelope::inspect(&data)?;
        let decoded = self.transformer.codec().decode(&data)?;
        let base = delta_base(&decoded.extra)?;
        let plaintext = match base {
            Some(base) => {
                let base_plain = self.transformer.delta_base_plaintext(&base)?;
                shroud_crypto::compress::delta_decompress(&base_plain, &decoded.plaintext)?
            }
            None => decoded.plaintext,
        };
        Ok(Reveal {
            oid: *oid,
            version: info.version,
            compressed: info.compressed,
            payload_len: info.payload_len,
            extra_len: info.extra.len(),
            delta_base: base,
            plain_oid: Oid::compute(ObjectKind::Blob, &plaintext),
            plaintext,
        })
    }

    /// Drop every mapping entry; the next run rebuilds every object.
    pub fn truncate_mappings(&self) -> Result<()> {
        warn!(path = %self.mapping().path().display(), "truncating oid mappings");
        self.transformer.mapping().truncate()?;
        self.transformer.clear_memo();
        Ok(())
    }

    /// End the run, returning its counters.
    pub fn finish(self) -> TransformStats {
        let stats = self.transformer.stats();
        info!(site = %self.site_id, %stats, "run finished");
        stats
    }
}
