/*
    This file is part of Classgraft.

    Classgraft is free software: you can redistribute it and/or modify
    it under the terms of the GNU Lesser General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    Classgraft is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with Classgraft. (LICENSE.md)  If not, see <https://www.gnu.org/licenses/>.
*/
//! Transforming every selected class of a jar or zip archive.
//!
//! Entries are written in their original order. Entries that are not changed are
//! copied without being recompressed, so their data and metadata stay exactly as
//! they were.

use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::clazz::ClassModel;
use crate::hierarchy::{BasicHierarchy, ClassHierarchy, Layered};
use crate::transform::callsite::{count_call_sites, CallSiteFilter};
use crate::transform::{Operation, TransformOptions, TransformReport, Transformer};
use crate::{Error, Result};

/// Decides which classes are transformed.
#[derive(Default)]
pub enum Selector {
    #[default]
    AllClasses,
    /// A class by internal name, `com/example/Main`. Dotted names are accepted too.
    ClassName(String),
    /// Classes declaring a method with this exact name and descriptor.
    DeclaresMethod { name: String, descriptor: String },
    /// Classes containing a call site the filter matches.
    CallsMethod(CallSiteFilter),
    Custom(Box<dyn Fn(&ClassModel) -> bool + Send + Sync>),
}

impl Selector {
    pub fn custom(f: impl Fn(&ClassModel) -> bool + Send + Sync + 'static) -> Self {
        Selector::Custom(Box::new(f))
    }

    pub fn matches(&self, class: &ClassModel) -> Result<bool> {
        Ok(match self {
            Selector::AllClasses => true,
            Selector::ClassName(name) => *class.name()? == name.replace('.', "/"),
            Selector::DeclaresMethod { name, descriptor } => class.find_method(name, descriptor).is_some(),
            Selector::CallsMethod(filter) => count_call_sites(class, filter)? > 0,
            Selector::Custom(f) => f(class),
        })
    }
}

impl Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::AllClasses => f.write_str("AllClasses"),
            Selector::ClassName(n) => write!(f, "ClassName({})", n),
            Selector::DeclaresMethod { name, descriptor } => write!(f, "DeclaresMethod({}{})", name, descriptor),
            Selector::CallsMethod(filter) => write!(f, "CallsMethod({:?})", filter),
            Selector::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug)]
pub struct ArchiveOptions {
    pub selector: Selector,
    /// Worker threads used to transform classes. `0` and `1` both mean the calling thread.
    pub jobs: usize,
    pub transform: TransformOptions,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            selector: Selector::AllClasses,
            jobs: 1,
            transform: TransformOptions::default(),
        }
    }
}

/// Aggregate counts of one archive run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub entries_scanned: usize,
    /// Class entries that could be parsed.
    pub classes_scanned: usize,
    pub entries_modified: usize,
    pub call_sites_rewritten: usize,
    /// One line per entry that was copied through because it could not be processed.
    pub warnings: Vec<String>,
    /// Size of the input archive in bytes.
    pub input_len: u64,
    /// Size of the written archive in bytes.
    pub output_len: u64,
    /// Wall time from opening the input to finishing the output.
    pub elapsed: Duration,
}

/// An entry of the input archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    /// The decompressed data, read only for class candidates.
    pub data: Vec<u8>,
    pub is_class: bool,
    compression: CompressionMethod,
    last_modified: DateTime,
    unix_mode: Option<u32>,
}

type Outcome = Result<(Option<Vec<u8>>, TransformReport)>;

struct Job {
    index: usize,
    model: ClassModel,
    outcome: Option<Outcome>,
}

impl Job {
    fn run(&mut self, transformer: &Transformer<'_>, ops: &[Operation], hierarchy: &dyn ClassHierarchy) {
        let model = &mut self.model;
        let outcome = transformer.apply(model, ops).and_then(|report| {
            if report.modified {
                Ok((Some(model.write_with(hierarchy)?), report))
            } else {
                Ok((None, report))
            }
        });
        self.outcome = Some(outcome);
    }
}

/// Runs a fixed list of operations over archives.
pub struct ArchiveProcessor {
    ops: Vec<Operation>,
    options: ArchiveOptions,
}

impl ArchiveProcessor {
    pub fn new(ops: Vec<Operation>, options: ArchiveOptions) -> Self {
        ArchiveProcessor { ops, options }
    }

    /// Reads an archive from `reader` and writes the result to `writer`.
    pub fn process<R: Read + Seek, W: Write + Seek>(&self, mut reader: R, writer: W) -> Result<ArchiveReport> {
        let started = Instant::now();
        let mut report = ArchiveReport::default();
        let start = reader.stream_position()?;
        report.input_len = reader.seek(SeekFrom::End(0))? - start;
        reader.seek(SeekFrom::Start(start))?;
        let mut archive = ZipArchive::new(reader)?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let is_class = !file.is_dir() && file.name().ends_with(".class");
            let mut data = Vec::new();
            if is_class {
                file.read_to_end(&mut data)?;
            }
            entries.push(ArchiveEntry {
                name: file.name().to_owned(),
                data,
                is_class,
                compression: file.compression(),
                last_modified: file.last_modified(),
                unix_mode: file.unix_mode(),
            });
        }
        report.entries_scanned = entries.len();

        // every class is parsed up front so frames can be merged against the archive's own classes
        let mut own = BasicHierarchy::new();
        let mut jobs = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if !entry.is_class {
                continue;
            }
            let model = ClassModel::parse(&entry.data).and_then(|model| {
                own.insert_class(&model)?;
                Ok(model)
            });
            match model {
                Ok(model) => {
                    report.classes_scanned += 1;
                    jobs.push(Job {
                        index,
                        model,
                        outcome: None,
                    });
                }
                Err(e) if e.is_malformed() => skip(&mut report, entry, &e),
                Err(e) => return Err(e),
            }
        }

        let mut selected = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.options.selector.matches(&job.model) {
                Ok(true) => selected.push(job),
                Ok(false) => {}
                Err(e) if e.is_malformed() => skip(&mut report, &entries[job.index], &e),
                Err(e) => return Err(e),
            }
        }
        debug!(
            "{} of {} classes selected by {:?}",
            selected.len(),
            report.classes_scanned,
            self.options.selector
        );

        let jdk = BasicHierarchy::with_jdk_defaults();
        let mut layers: Vec<&dyn ClassHierarchy> = vec![&own as &dyn ClassHierarchy];
        if let Some(h) = &self.options.transform.hierarchy {
            layers.push(h.as_ref());
        }
        layers.push(&jdk);
        let hierarchy = Layered(layers);
        let transformer = Transformer::new(self.options.transform.clone(), &hierarchy);
        let workers = self.options.jobs.clamp(1, selected.len().max(1));
        if workers == 1 {
            for job in &mut selected {
                job.run(&transformer, &self.ops, &hierarchy);
            }
        } else {
            let per_worker = (selected.len() + workers - 1) / workers;
            let transformer = &transformer;
            let ops = &self.ops[..];
            let hierarchy = &hierarchy;
            std::thread::scope(|s| {
                for chunk in selected.chunks_mut(per_worker) {
                    s.spawn(move || {
                        for job in chunk {
                            job.run(transformer, ops, hierarchy);
                        }
                    });
                }
            });
        }

        // fatal failures abort before anything is written
        let mut rewritten: Vec<Option<Vec<u8>>> = vec![None; entries.len()];
        for job in selected {
            let entry = &entries[job.index];
            match job.outcome {
                Some(Ok((Some(bytes), r))) => {
                    info!("{}: rewritten, {} call sites", entry.name, r.call_sites_rewritten);
                    report.entries_modified += 1;
                    report.call_sites_rewritten += r.call_sites_rewritten;
                    rewritten[job.index] = Some(bytes);
                }
                Some(Ok((None, _))) | None => {}
                Some(Err(e)) if e.is_local() || e.is_malformed() => skip(&mut report, entry, &e),
                Some(Err(e)) => return Err(e),
            }
        }

        let mut zip = ZipWriter::new(writer);
        let comment = archive.comment();
        if !comment.is_empty() {
            zip.set_comment(String::from_utf8_lossy(comment));
        }
        for (index, entry) in entries.iter().enumerate() {
            match rewritten[index].take() {
                Some(bytes) => {
                    let method = if entry.compression == CompressionMethod::Stored {
                        CompressionMethod::Stored
                    } else {
                        CompressionMethod::Deflated
                    };
                    let mut options = FileOptions::default()
                        .compression_method(method)
                        .last_modified_time(entry.last_modified);
                    if let Some(mode) = entry.unix_mode {
                        options = options.unix_permissions(mode);
                    }
                    zip.start_file(entry.name.as_str(), options)?;
                    zip.write_all(&bytes)?;
                }
                None => zip.raw_copy_file(archive.by_index_raw(index)?)?,
            }
        }
        let mut writer = zip.finish()?;
        report.output_len = writer.stream_position()?;
        report.elapsed = started.elapsed();
        info!(
            "{} of {} entries modified, {} call sites rewritten, {} -> {} bytes in {:?}",
            report.entries_modified,
            report.entries_scanned,
            report.call_sites_rewritten,
            report.input_len,
            report.output_len,
            report.elapsed
        );
        Ok(report)
    }

    /// Processes an archive held in memory.
    pub fn process_bytes(&self, input: &[u8]) -> Result<(Vec<u8>, ArchiveReport)> {
        let mut out = Cursor::new(Vec::with_capacity(input.len()));
        let report = self.process(Cursor::new(input), &mut out)?;
        Ok((out.into_inner(), report))
    }

    /// Processes the archive at `input` into `output`, which is replaced only on success.
    pub fn process_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<ArchiveReport> {
        let input = input.as_ref();
        let output = output.as_ref();
        let reader = BufReader::new(File::open(input)?);
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        let report = self.process(reader, tmp.as_file_mut())?;
        tmp.persist(output).map_err(|e| Error::IO(e.error))?;
        info!("{} -> {}", input.display(), output.display());
        Ok(report)
    }
}

fn skip(report: &mut ArchiveReport, entry: &ArchiveEntry, e: &Error) {
    warn!("{}: copied unchanged, {}", entry.name, e);
    report.warnings.push(format!("{}: {}", entry.name, e));
}
