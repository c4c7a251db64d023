//! The ingestion coordinator: reads genotype text, fans line batches out to
//! decode workers, and collects blocks strictly in submission order, so the
//! resulting table is identical for any worker count.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytelines::ByteLinesReader;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use flate2::bufread::MultiGzDecoder;

use crate::codec::diploid::{decode_haplotype, unpack, UNKNOWN_ALLELE};
use crate::error::BuildError;
use crate::formats::hapmap::{self, HapMapContext};
use crate::formats::line_index::LineIndex;
use crate::formats::plink::{self, PedContext};
use crate::formats::vcf::{self, VcfContext};
use crate::formats::{DecodedBlock, RowBlock};
use crate::matrix::{DepthMatrix, GenotypeMatrix, MatrixAssembler};
use crate::order::{sort_and_revalidate, validate_ordering};
use crate::position::{ChromTable, Position};

/// Default budget of matrix cells per worker batch. Batches are sized so a
/// batch of lines decodes to roughly this many cells regardless of taxa
/// count.
pub const CELL_BUDGET: usize = 1 << 25;

const MIN_BATCH_LINES: usize = 512;
const MAX_BATCH_LINES: usize = 65_536;

/// One sample with its header annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxon {
    pub name: String,
    pub annotations: Vec<(String, String)>,
}

impl Taxon {
    pub fn new(name: &str) -> Taxon {
        Taxon {
            name: name.to_string(),
            annotations: Vec::new(),
        }
    }
}

/// A fully ingested genotype table.
#[derive(Debug)]
pub struct GenotypeTable {
    pub taxa: Vec<Taxon>,
    pub positions: Vec<Position>,
    pub genotypes: GenotypeMatrix,
    pub depth: Option<DepthMatrix>,
}

impl GenotypeTable {
    pub fn num_taxa(&self) -> usize {
        self.taxa.len()
    }

    pub fn num_sites(&self) -> usize {
        self.positions.len()
    }

    /// Per-site (major, minor) allele symbols by observed count. Unknown
    /// nibbles are not counted; ties break toward the lower allele code. A
    /// site with fewer than two observed alleles pads with 'N'.
    pub fn major_minor_alleles(&self) -> Vec<(u8, u8)> {
        let mut out = Vec::with_capacity(self.num_sites());
        for site in 0..self.num_sites() {
            let mut counts = [0u64; 16];
            for taxon in 0..self.num_taxa() {
                let (a, b) = unpack(self.genotypes.get(taxon, site));
                if a != UNKNOWN_ALLELE {
                    counts[a as usize] += 1;
                }
                if b != UNKNOWN_ALLELE {
                    counts[b as usize] += 1;
                }
            }

            let mut major: Option<(u8, u64)> = None;
            let mut minor: Option<(u8, u64)> = None;
            for code in 0..16u8 {
                let count = counts[code as usize];
                if count == 0 {
                    continue;
                }
                match major {
                    Some((_, top)) if count <= top => match minor {
                        Some((_, second)) if count <= second => {}
                        _ => minor = Some((code, count)),
                    },
                    _ => {
                        minor = major;
                        major = Some((code, count));
                    }
                }
            }
            out.push((
                decode_haplotype(major.map_or(UNKNOWN_ALLELE, |(c, _)| c)),
                decode_haplotype(minor.map_or(UNKNOWN_ALLELE, |(c, _)| c)),
            ));
        }
        out
    }
}

/// Builder-configured ingestion front end.
#[derive(Debug, Clone)]
pub struct GenotypeBuilder {
    threads: usize,
    sort_permitted: bool,
    keep_depth: bool,
    cell_budget: usize,
}

impl Default for GenotypeBuilder {
    fn default() -> GenotypeBuilder {
        GenotypeBuilder {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            sort_permitted: false,
            keep_depth: false,
            cell_budget: CELL_BUDGET,
        }
    }
}

impl GenotypeBuilder {
    pub fn new() -> GenotypeBuilder {
        GenotypeBuilder::default()
    }

    pub fn with_threads(mut self, threads: usize) -> GenotypeBuilder {
        self.threads = threads.max(1);
        self
    }

    /// Permit a one-shot global sort when the input is out of position
    /// order. Off by default; unordered input is then an error.
    pub fn with_sorting(mut self, permitted: bool) -> GenotypeBuilder {
        self.sort_permitted = permitted;
        self
    }

    /// Capture per-allele read depths (VCF AD) alongside genotypes.
    pub fn with_depth(mut self, keep: bool) -> GenotypeBuilder {
        self.keep_depth = keep;
        self
    }

    pub fn with_cell_budget(mut self, cells: usize) -> GenotypeBuilder {
        self.cell_budget = cells.max(1);
        self
    }

    fn batch_lines(&self, row_width: usize) -> usize {
        (self.cell_budget / row_width.max(1)).clamp(MIN_BATCH_LINES, MAX_BATCH_LINES)
    }

    /// Ingest HapMap text: `##` comments and SAMPLE annotations, a taxa
    /// header row, then one tab-delimited site per line.
    pub fn build_from_hapmap<R: BufRead>(
        &self,
        reader: R,
        file: &str,
    ) -> Result<GenotypeTable, BuildError> {
        let mut lines = reader.byte_lines().into_iter();
        let mut line_no = 0u64;

        let mut annotations: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut taxa_names: Option<Vec<String>> = None;
        let mut first_data: Option<(u64, Vec<u8>)> = None;

        for line in lines.by_ref() {
            line_no += 1;
            let line = line?;
            if line.starts_with(b"##") {
                if let Some((id, pairs)) = hapmap::parse_sample_annotation(&line) {
                    annotations.insert(id, pairs);
                }
                continue;
            }
            if taxa_names.is_none() {
                taxa_names = Some(hapmap::parse_header_row(&line, file, line_no)?);
                continue;
            }
            first_data = Some((line_no, line));
            break;
        }

        let taxa_names = taxa_names.ok_or_else(|| BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: "missing taxa header row".to_string(),
        })?;
        let num_taxa = taxa_names.len();
        let taxa: Vec<Taxon> = taxa_names
            .into_iter()
            .map(|name| Taxon {
                annotations: annotations.remove(&name).unwrap_or_default(),
                name,
            })
            .collect();

        let mut assembler = MatrixAssembler::new(num_taxa, false);
        if let Some((first_line_no, first_line)) = first_data {
            let two_char = hapmap::detect_code_width(&first_line, num_taxa, file, first_line_no)?;
            log::debug!(
                "{}: {} taxa, {}-character genotype codes",
                file,
                num_taxa,
                if two_char { 2 } else { 1 }
            );

            let decoder = BlockDecoder::HapMap(HapMapContext {
                file: file.to_string(),
                taxa: num_taxa,
                two_char,
                chrom_table: Arc::new(ChromTable::new()),
            });
            let source = std::iter::once(Ok(first_line)).chain(lines);
            self.run_pipeline(
                source,
                &decoder,
                self.batch_lines(num_taxa),
                first_line_no,
                |decoded| {
                    if let Decoded::Columns(block) = decoded {
                        assembler.push_block(block.positions, block.genotypes, block.depth);
                    }
                    Ok(())
                },
            )?;
        }

        self.seal_assembled(taxa, assembler)
    }

    /// Ingest VCF text. Alleles expand to one site per character, with
    /// insertion characters becoming sub-positions; AD depths are captured
    /// when the builder asks for depth.
    pub fn build_from_vcf<R: BufRead>(
        &self,
        reader: R,
        file: &str,
    ) -> Result<GenotypeTable, BuildError> {
        let mut lines = reader.byte_lines().into_iter();
        let mut line_no = 0u64;

        let mut taxa_names: Option<Vec<String>> = None;
        for line in lines.by_ref() {
            line_no += 1;
            let line = line?;
            if line.starts_with(b"##") {
                continue;
            }
            if line.starts_with(b"#") {
                taxa_names = Some(vcf::parse_header(&line, file, line_no)?);
                break;
            }
            return Err(BuildError::Format {
                file: file.to_string(),
                line: line_no,
                message: "data record before the #CHROM header".to_string(),
            });
        }

        let taxa_names = taxa_names.ok_or_else(|| BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: "missing #CHROM header".to_string(),
        })?;
        let num_taxa = taxa_names.len();
        let taxa: Vec<Taxon> = taxa_names.iter().map(|n| Taxon::new(n)).collect();

        let decoder = BlockDecoder::Vcf(VcfContext {
            file: file.to_string(),
            taxa: num_taxa,
            keep_depth: self.keep_depth,
            chrom_table: Arc::new(ChromTable::new()),
        });

        let mut assembler = MatrixAssembler::new(num_taxa, self.keep_depth);
        self.run_pipeline(
            lines,
            &decoder,
            self.batch_lines(num_taxa),
            line_no + 1,
            |decoded| {
                if let Decoded::Columns(block) = decoded {
                    assembler.push_block(block.positions, block.genotypes, block.depth);
                }
                Ok(())
            },
        )?;

        self.seal_assembled(taxa, assembler)
    }

    /// Ingest a PLINK .map/.ped pair. The map supplies positions; ped lines
    /// are taxon-major and decode straight into matrix rows.
    pub fn build_from_plink<M: BufRead, P: BufRead>(
        &self,
        map: M,
        ped: P,
        map_file: &str,
        ped_file: &str,
    ) -> Result<GenotypeTable, BuildError> {
        let chrom_table = ChromTable::new();
        let positions = plink::parse_map(map, map_file, &chrom_table)?;
        let sites = positions.len();
        log::debug!("{}: {} sites", map_file, sites);

        let decoder = BlockDecoder::Ped(PedContext {
            file: ped_file.to_string(),
            sites,
        });

        let mut names: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<u8>> = Vec::new();
        self.run_pipeline(
            ped.byte_lines().into_iter(),
            &decoder,
            self.batch_lines(sites),
            1,
            |decoded| {
                if let Decoded::Rows(block) = decoded {
                    names.extend(block.names);
                    rows.extend(block.rows);
                }
                Ok(())
            },
        )?;

        let mut genotypes = GenotypeMatrix::new_unknown(names.len(), sites);
        for (taxon, row) in rows.iter().enumerate() {
            for (site, &diploid) in row.iter().enumerate() {
                genotypes.set(taxon, site, diploid);
            }
        }

        let taxa = names.iter().map(|n| Taxon::new(n)).collect();
        self.seal(taxa, positions, genotypes, None)
    }

    /// Ingest block-gzipped HapMap text carrying a line index sidecar. The
    /// index is validated up front; ingestion itself streams the members in
    /// order.
    pub fn build_from_indexed_hapmap(
        &self,
        data: &Path,
        index: &Path,
    ) -> Result<GenotypeTable, BuildError> {
        let line_index = LineIndex::open(index)?;
        log::debug!(
            "{}: index covers {} entries every {} lines",
            index.display(),
            line_index.offsets.len(),
            line_index.line_interval
        );

        // A full build touches every line, so the members are streamed in
        // file order and the offsets stay unused; they exist for
        // IndexedReader::line random access. The header scan inside the
        // HapMap path subsumes the index's comment/header-skip fields.
        let reader = BufReader::new(MultiGzDecoder::new(BufReader::new(File::open(data)?)));
        self.build_from_hapmap(reader, &data.display().to_string())
    }

    fn seal_assembled(
        &self,
        taxa: Vec<Taxon>,
        assembler: MatrixAssembler,
    ) -> Result<GenotypeTable, BuildError> {
        let (positions, genotypes, depth) = assembler.finish();
        self.seal(taxa, positions, genotypes, depth)
    }

    /// Final ordering check, with the optional one-shot sort repair.
    fn seal(
        &self,
        taxa: Vec<Taxon>,
        mut positions: Vec<Position>,
        mut genotypes: GenotypeMatrix,
        mut depth: Option<DepthMatrix>,
    ) -> Result<GenotypeTable, BuildError> {
        if let Err(e) = validate_ordering(&positions) {
            if !self.sort_permitted {
                return Err(e);
            }
            sort_and_revalidate(&mut positions, &mut genotypes, depth.as_mut())?;
        }

        log::debug!(
            "table sealed: {} taxa x {} sites",
            taxa.len(),
            positions.len()
        );
        Ok(GenotypeTable {
            taxa,
            positions,
            genotypes,
            depth,
        })
    }

    fn run_pipeline<I>(
        &self,
        source: I,
        decoder: &BlockDecoder,
        batch_lines: usize,
        first_line_no: u64,
        mut on_block: impl FnMut(Decoded) -> Result<(), BuildError>,
    ) -> Result<(), BuildError>
    where
        I: Iterator<Item = io::Result<Vec<u8>>>,
    {
        let work: ArrayQueue<Job> = ArrayQueue::new(self.threads * 2 + 1);
        let results: ArrayQueue<(u64, Result<Decoded, BuildError>)> =
            ArrayQueue::new(self.threads * 2 + 1);
        let shutdown = AtomicBool::new(false);

        crossbeam::thread::scope(|s| {
            for _ in 0..self.threads {
                s.spawn(|_| decode_worker(&work, &results, &shutdown, decoder));
            }

            let run = coordinate(
                &work,
                &results,
                source,
                batch_lines,
                first_line_no,
                &mut on_block,
            );
            // Workers drain remaining batches without decoding and exit.
            shutdown.store(true, Ordering::SeqCst);
            run
        })
        .map_err(|_| BuildError::Resource("decode worker panicked".to_string()))?
    }
}

struct Job {
    id: u64,
    first_line_no: u64,
    lines: Vec<Vec<u8>>,
}

enum Decoded {
    Columns(DecodedBlock),
    Rows(RowBlock),
}

enum BlockDecoder {
    HapMap(HapMapContext),
    Vcf(VcfContext),
    Ped(PedContext),
}

impl BlockDecoder {
    fn decode(&self, lines: &[Vec<u8>], first_line_no: u64) -> Result<Decoded, BuildError> {
        match self {
            BlockDecoder::HapMap(ctx) => {
                hapmap::decode_block(ctx, lines, first_line_no).map(Decoded::Columns)
            }
            BlockDecoder::Vcf(ctx) => {
                vcf::decode_block(ctx, lines, first_line_no).map(Decoded::Columns)
            }
            BlockDecoder::Ped(ctx) => {
                plink::decode_ped_lines(ctx, lines, first_line_no).map(Decoded::Rows)
            }
        }
    }
}

fn decode_worker(
    work: &ArrayQueue<Job>,
    results: &ArrayQueue<(u64, Result<Decoded, BuildError>)>,
    shutdown: &AtomicBool,
    decoder: &BlockDecoder,
) {
    let backoff = Backoff::new();
    loop {
        match work.pop() {
            Some(job) => {
                backoff.reset();
                if shutdown.load(Ordering::Relaxed) {
                    continue;
                }
                let mut entry = (job.id, decoder.decode(&job.lines, job.first_line_no));
                loop {
                    match results.push(entry) {
                        Ok(()) => break,
                        Err(back) => {
                            if shutdown.load(Ordering::Relaxed) {
                                break;
                            }
                            entry = back;
                            backoff.snooze();
                        }
                    }
                }
            }
            None => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                backoff.snooze();
            }
        }
    }
}

/// Reads the source, dispatches batches, and hands completed blocks to
/// `on_block` strictly in submission order. When several workers fail, the
/// earliest submitted failure wins.
fn coordinate<I>(
    work: &ArrayQueue<Job>,
    results: &ArrayQueue<(u64, Result<Decoded, BuildError>)>,
    source: I,
    batch_lines: usize,
    first_line_no: u64,
    on_block: &mut dyn FnMut(Decoded) -> Result<(), BuildError>,
) -> Result<(), BuildError>
where
    I: Iterator<Item = io::Result<Vec<u8>>>,
{
    let mut pending: HashMap<u64, Result<Decoded, BuildError>> = HashMap::new();
    let mut next_id = 0u64;
    let mut dispatched = 0u64;
    let mut line_no = first_line_no;
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(batch_lines);
    let mut batch_start = first_line_no;

    for line in source {
        let line = line?;
        if batch.is_empty() {
            batch_start = line_no;
        }
        line_no += 1;
        batch.push(line);

        if batch.len() == batch_lines {
            let job = Job {
                id: dispatched,
                first_line_no: batch_start,
                lines: std::mem::take(&mut batch),
            };
            dispatched += 1;
            dispatch(work, results, &mut pending, &mut next_id, on_block, job)?;
        }
    }

    if !batch.is_empty() {
        let job = Job {
            id: dispatched,
            first_line_no: batch_start,
            lines: std::mem::take(&mut batch),
        };
        dispatched += 1;
        dispatch(work, results, &mut pending, &mut next_id, on_block, job)?;
    }

    // Everything is dispatched; wait out the tail in submission order.
    let backoff = Backoff::new();
    while next_id < dispatched {
        collect(results, &mut pending, &mut next_id, on_block)?;
        backoff.snooze();
    }
    Ok(())
}

fn dispatch(
    work: &ArrayQueue<Job>,
    results: &ArrayQueue<(u64, Result<Decoded, BuildError>)>,
    pending: &mut HashMap<u64, Result<Decoded, BuildError>>,
    next_id: &mut u64,
    on_block: &mut dyn FnMut(Decoded) -> Result<(), BuildError>,
    job: Job,
) -> Result<(), BuildError> {
    let backoff = Backoff::new();
    let mut job = job;
    loop {
        match work.push(job) {
            Ok(()) => break,
            Err(back) => {
                job = back;
                collect(results, pending, next_id, on_block)?;
                backoff.snooze();
            }
        }
    }
    collect(results, pending, next_id, on_block)
}

fn collect(
    results: &ArrayQueue<(u64, Result<Decoded, BuildError>)>,
    pending: &mut HashMap<u64, Result<Decoded, BuildError>>,
    next_id: &mut u64,
    on_block: &mut dyn FnMut(Decoded) -> Result<(), BuildError>,
) -> Result<(), BuildError> {
    while let Some((id, decoded)) = results.pop() {
        pending.insert(id, decoded);
    }
    while let Some(decoded) = pending.remove(next_id) {
        on_block(decoded?)?;
        *next_id += 1;
    }
    Ok(())
}
