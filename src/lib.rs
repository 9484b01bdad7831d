use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, info};
use smallvec::SmallVec;
use thiserror::Error;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given word, based on its index in the word list.
pub type WordId = usize;

/// Zero-indexed x and y coords for a cell in the grid, where y = 0 in the top row.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A run of open cells that needs to be filled with a word. Two slots are
/// the same slot exactly when their start cell, length, and direction all
/// match, so a slot can be used directly as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub start: GridCoord,
    pub length: usize,
    pub direction: Direction,
}

impl Slot {
    /// Generate the coords for each cell of this slot.
    pub fn cell_coords(&self) -> Vec<GridCoord> {
        (0..self.length).map(|cell_idx| {
            match self.direction {
                Direction::Across => (self.start.0 + cell_idx, self.start.1),
                Direction::Down => (self.start.0, self.start.1 + cell_idx),
            }
        }).collect()
    }
}

/// Errors produced while loading a grid template or word list. The filler
/// itself never returns these; a grid that can't be filled is reported as
/// the absence of a solution, not as an error.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("grid template has no rows")]
    EmptyTemplate,
    #[error("unexpected character {found:?} in grid template")]
    UnexpectedChar { found: char },
    #[error("grid template contains no slots")]
    NoSlots,
    #[error("word list is empty")]
    EmptyWordList,
}

/// A word that can be chosen for a slot, with its letters broken out so
/// individual cells can be checked without re-walking the string.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub letters: SmallVec<[char; MAX_SLOT_LENGTH]>,
}

/// The candidate vocabulary, lowercased and deduplicated on ingest. Because
/// duplicates are dropped, two equal `WordId`s always mean the same word.
pub struct WordList {
    words: Vec<Word>,
}

impl WordList {
    pub fn new<I>(words: I) -> WordList
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut list: Vec<Word> = vec![];

        for word in words {
            let word = word.as_ref().trim().to_lowercase();
            if word.is_empty() || !seen.insert(word.clone()) {
                continue;
            }
            list.push(Word { letters: word.chars().collect(), text: word });
        }

        WordList { words: list }
    }

    /// Load a word list from a file with one word per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<WordList, LoadError> {
        let contents = fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        let list = WordList::new(contents.lines());
        if list.words.is_empty() {
            return Err(LoadError::EmptyWordList);
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, word_id: WordId) -> &Word {
        &self.words[word_id]
    }

    pub fn index_of(&self, text: &str) -> Option<WordId> {
        self.words.iter().position(|word| word.text == text)
    }
}

/// The static topology of a grid: which cells are open, where the slots
/// are, and how they cross each other. Built once from a template and only
/// ever queried after that.
pub struct Grid {
    pub width: usize,
    pub height: usize,
    open_cells: Vec<Vec<bool>>,
    slots: SmallVec<[Slot; MAX_SLOT_COUNT]>,
    overlaps: HashMap<(Slot, Slot), (usize, usize)>,
    neighbors: HashMap<Slot, HashSet<Slot>>,
}

impl Grid {
    /// Build a grid from a string template, with `.` representing open
    /// cells and `#` representing blocks. Lines are trimmed and blank lines
    /// skipped, so templates can be written indented inline; short rows are
    /// padded with blocks. Slots are maximal horizontal or vertical runs of
    /// at least two open cells.
    pub fn parse(template: &str) -> Result<Grid, LoadError> {
        let mut rows: Vec<Vec<char>> = vec![];
        for line in template.lines() {
            let line = line.trim();
            if !line.is_empty() {
                rows.push(line.chars().collect());
            }
        }
        if rows.is_empty() {
            return Err(LoadError::EmptyTemplate);
        }

        let width = rows.iter().map(|row| row.len()).max().expect("rows is non-empty");
        for row in rows.iter_mut() {
            if let Some(&found) = row.iter().find(|&&c| c != '.' && c != '#') {
                return Err(LoadError::UnexpectedChar { found });
            }
            row.resize(width, '#');
        }
        let height = rows.len();

        let open_cells: Vec<Vec<bool>> =
            rows.iter().map(|row| row.iter().map(|&c| c == '.').collect()).collect();

        let mut slots: SmallVec<[Slot; MAX_SLOT_COUNT]> = SmallVec::new();

        for y in 0..height {
            let mut run_start: Option<usize> = None;
            for x in 0..=width {
                let open = x < width && open_cells[y][x];
                if open && run_start.is_none() {
                    run_start = Some(x);
                }
                if !open {
                    if let Some(start) = run_start.take() {
                        if x - start > 1 {
                            slots.push(Slot {
                                start: (start, y),
                                length: x - start,
                                direction: Direction::Across,
                            });
                        }
                    }
                }
            }
        }

        for x in 0..width {
            let mut run_start: Option<usize> = None;
            for y in 0..=height {
                let open = y < height && open_cells[y][x];
                if open && run_start.is_none() {
                    run_start = Some(y);
                }
                if !open {
                    if let Some(start) = run_start.take() {
                        if y - start > 1 {
                            slots.push(Slot {
                                start: (x, start),
                                length: y - start,
                                direction: Direction::Down,
                            });
                        }
                    }
                }
            }
        }

        if slots.is_empty() {
            return Err(LoadError::NoSlots);
        }

        // Build a map from cell location to the slots passing through it,
        // which gives us the crossings. A cell is shared by at most one
        // across and one down slot, since slots are maximal runs.
        let mut slots_by_cell: HashMap<GridCoord, Vec<(Slot, usize)>> = HashMap::new();
        for &slot in &slots {
            for (cell_idx, loc) in slot.cell_coords().into_iter().enumerate() {
                slots_by_cell.entry(loc).or_insert_with(Vec::new).push((slot, cell_idx));
            }
        }

        let mut overlaps: HashMap<(Slot, Slot), (usize, usize)> = HashMap::new();
        let mut neighbors: HashMap<Slot, HashSet<Slot>> =
            slots.iter().map(|&slot| (slot, HashSet::new())).collect();

        for sharing in slots_by_cell.values() {
            for &(a, a_cell) in sharing {
                for &(b, b_cell) in sharing {
                    if a == b {
                        continue;
                    }
                    overlaps.insert((a, b), (a_cell, b_cell));
                    neighbors.get_mut(&a).expect("every slot has a neighbor entry").insert(b);
                }
            }
        }

        Ok(Grid { width, height, open_cells, slots, overlaps, neighbors })
    }

    /// Load a grid template from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Grid, LoadError> {
        let contents = fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Grid::parse(&contents)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_open(&self, x: usize, y: usize) -> bool {
        self.open_cells[y][x]
    }

    /// The shared cell between two slots, as a cell index into each slot's
    /// word, or `None` if the slots don't cross.
    pub fn overlap(&self, a: Slot, b: Slot) -> Option<(usize, usize)> {
        self.overlaps.get(&(a, b)).copied()
    }

    /// Every slot crossing the given slot. Panics if the slot doesn't
    /// belong to this grid.
    pub fn neighbors(&self, slot: Slot) -> &HashSet<Slot> {
        &self.neighbors[&slot]
    }
}

/// A mapping from slot to chosen word; partial while the search is still
/// running, complete once every slot has an entry.
pub type Assignment = HashMap<Slot, WordId>;

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// Worklist of ordered slot pairs still to be made consistent. Enqueueing
/// an arc that is already pending does nothing, so the queue stays bounded
/// by the number of ordered pairs.
struct ArcQueue {
    queue: VecDeque<(Slot, Slot)>,
}

impl ArcQueue {
    fn from_arcs<I>(arcs: I) -> ArcQueue
        where
            I: IntoIterator<Item = (Slot, Slot)>,
    {
        ArcQueue { queue: VecDeque::from_iter(arcs) }
    }

    fn pop_front(&mut self) -> Option<(Slot, Slot)> {
        self.queue.pop_front()
    }

    fn enqueue(&mut self, arc: (Slot, Slot)) {
        if !self.queue.contains(&arc) {
            self.queue.push_back(arc);
        }
    }
}

/// The live state of a fill: one candidate set per slot, shrinking as
/// constraints propagate, plus counters for the search.
pub struct Filler<'a> {
    grid: &'a Grid,
    words: &'a WordList,
    domains: HashMap<Slot, BitSet>,
    statistics: Statistics,
}

impl<'a> Filler<'a> {
    /// Set up a filler with every slot's domain holding the full word list.
    pub fn new(grid: &'a Grid, words: &'a WordList) -> Filler<'a> {
        let domains = grid.slots().iter().map(|&slot| {
            (slot, (0..words.len()).collect::<BitSet>())
        }).collect();

        Filler {
            grid,
            words,
            domains,
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Enforce node and arc consistency, then search for a complete
    /// assignment. `None` means the grid can't be filled from this word
    /// list, either proven during propagation or by exhausting the search.
    pub fn solve(&mut self) -> Option<Assignment> {
        let start = Instant::now();

        self.enforce_node_consistency();
        if !self.enforce_arc_consistency(None) {
            self.statistics.duration = start.elapsed();
            info!("a domain emptied during propagation; grid is unfillable");
            return None;
        }

        let mut assignment = Assignment::new();
        let solved = self.backtrack(&mut assignment);
        self.statistics.duration = start.elapsed();
        info!("search finished: {:?}", self.statistics);

        if solved {
            Some(assignment)
        } else {
            None
        }
    }

    /// Drop every word whose length doesn't match its slot. Domains only
    /// ever shrink from here on.
    fn enforce_node_consistency(&mut self) {
        for (slot, domain) in self.domains.iter_mut() {
            let keep: BitSet = domain.iter()
                .filter(|&word_id| self.words.get(word_id).letters.len() == slot.length)
                .collect();

            debug!(
                "node consistency dropped {} of {} words for {:?}",
                domain.len() - keep.len(),
                domain.len(),
                slot,
            );
            *domain = keep;
        }
    }

    /// Make `x` arc-consistent with `y`: keep only those words in `x`'s
    /// domain that agree with at least one word in `y`'s domain at the
    /// shared cell. Returns whether `x`'s domain changed. Slots that don't
    /// cross never need revision.
    fn revise(&mut self, x: Slot, y: Slot) -> bool {
        let (x_cell, y_cell) = match self.grid.overlap(x, y) {
            Some(cells) => cells,
            None => return false,
        };

        let keep: BitSet = self.domains[&x].iter().filter(|&x_word_id| {
            match self.words.get(x_word_id).letters.get(x_cell) {
                Some(&x_letter) => self.domains[&y].iter().any(|y_word_id| {
                    self.words.get(y_word_id).letters.get(y_cell) == Some(&x_letter)
                }),
                None => false,
            }
        }).collect();

        if keep.len() == self.domains[&x].len() {
            return false;
        }

        debug!("revised {:?} against {:?}: {} words left", x, y, keep.len());
        self.domains.insert(x, keep);
        true
    }

    /// Propagate crossing constraints until a fixpoint (AC-3). Starts from
    /// `initial_arcs` if given, otherwise from every ordered pair of
    /// distinct slots. Whenever a revision shrinks `x`, every arc `(z, x)`
    /// for the other neighbors `z` of `x` goes back on the queue, since the
    /// smaller domain may have lost the support for their words. Returns
    /// `false` as soon as any domain empties, which proves no fill exists.
    /// Every revision strictly shrinks a finite domain, so the loop always
    /// terminates.
    fn enforce_arc_consistency(&mut self, initial_arcs: Option<Vec<(Slot, Slot)>>) -> bool {
        let mut queue = match initial_arcs {
            Some(arcs) => ArcQueue::from_arcs(arcs),
            None => ArcQueue::from_arcs(
                self.grid.slots().iter().flat_map(|&x| {
                    self.grid.slots().iter().filter_map(move |&y| {
                        if x == y { None } else { Some((x, y)) }
                    })
                })
            ),
        };

        while let Some((x, y)) = queue.pop_front() {
            if !self.revise(x, y) {
                continue;
            }

            if self.domains[&x].is_empty() {
                debug!("no words remain for {:?}", x);
                return false;
            }

            for &z in self.grid.neighbors(x) {
                if z != y {
                    queue.enqueue((z, x));
                }
            }
        }

        true
    }

    /// A complete assignment has exactly one entry for every slot.
    fn is_complete(&self, assignment: &Assignment) -> bool {
        assignment.len() == self.grid.slots().len()
            && self.grid.slots().iter().all(|slot| assignment.contains_key(slot))
    }

    /// Check a partial assignment: every assigned word fits its slot, no
    /// word is used twice, and crossing slots that are both assigned agree
    /// on the shared letter. Unassigned slots constrain nothing yet.
    fn is_consistent(&self, assignment: &Assignment) -> bool {
        let mut used: HashSet<WordId> = HashSet::with_capacity(assignment.len());

        for (&slot, &word_id) in assignment {
            let word = self.words.get(word_id);
            if word.letters.len() != slot.length {
                return false;
            }
            if !used.insert(word_id) {
                return false;
            }

            for &neighbor in self.grid.neighbors(slot) {
                let neighbor_word_id = match assignment.get(&neighbor) {
                    Some(&id) => id,
                    None => continue,
                };
                let (own_cell, neighbor_cell) = self.grid.overlap(slot, neighbor)
                    .expect("neighboring slots always share a cell");

                if word.letters.get(own_cell)
                    != self.words.get(neighbor_word_id).letters.get(neighbor_cell)
                {
                    return false;
                }
            }
        }

        true
    }

    /// Pick the unassigned slot with the fewest remaining words, breaking
    /// ties toward the slot with the most crossings. Any slot tied on both
    /// counts is an acceptable choice.
    fn select_unassigned_slot(&self, assignment: &Assignment) -> Slot {
        self.grid.slots().iter()
            .filter(|slot| !assignment.contains_key(*slot))
            .min_by_key(|&&slot| {
                (self.domains[&slot].len(), Reverse(self.grid.neighbors(slot).len()))
            })
            .copied()
            .expect("an unassigned slot exists while the assignment is incomplete")
    }

    /// Order a slot's candidate words by how many options each one would
    /// rule out across the domains of unassigned crossing slots, fewest
    /// first. The sort is stable, so ties keep their domain order.
    fn order_domain_values(&self, slot: Slot, assignment: &Assignment) -> Vec<WordId> {
        let crossings: Vec<(Slot, usize, usize)> = self.grid.neighbors(slot).iter()
            .filter(|neighbor| !assignment.contains_key(*neighbor))
            .map(|&neighbor| {
                let (own_cell, neighbor_cell) = self.grid.overlap(slot, neighbor)
                    .expect("neighboring slots always share a cell");
                (neighbor, own_cell, neighbor_cell)
            })
            .collect();

        let mut candidates: Vec<WordId> = self.domains[&slot].iter().collect();
        candidates.sort_by_cached_key(|&word_id| {
            let letters = &self.words.get(word_id).letters;

            crossings.iter().map(|&(neighbor, own_cell, neighbor_cell)| {
                let own_letter = letters.get(own_cell);
                self.domains[&neighbor].iter().filter(|&neighbor_word_id| {
                    self.words.get(neighbor_word_id).letters.get(neighbor_cell) != own_letter
                }).count()
            }).sum::<usize>()
        });

        candidates
    }

    /// Depth-first search over partial assignments. Each trial extends the
    /// assignment with one word, checks consistency, and recurses; a failed
    /// trial removes exactly the entry it added before moving on. Returns
    /// whether a complete assignment was reached.
    fn backtrack(&mut self, assignment: &mut Assignment) -> bool {
        self.statistics.states += 1;

        if self.is_complete(assignment) {
            return true;
        }

        let slot = self.select_unassigned_slot(assignment);
        for word_id in self.order_domain_values(slot, assignment) {
            assignment.insert(slot, word_id);
            if self.is_consistent(assignment) && self.backtrack(assignment) {
                return true;
            }
            assignment.remove(&slot);
        }

        self.statistics.backtracks += 1;
        false
    }
}

/// Project an assignment onto a 2-D array of letters, one entry per cell.
pub fn letter_grid(grid: &Grid, words: &WordList, assignment: &Assignment) -> Vec<Vec<Option<char>>> {
    let mut letters: Vec<Vec<Option<char>>> =
        (0..grid.height).map(|_| vec![None; grid.width]).collect();

    for (slot, &word_id) in assignment {
        for (cell_idx, (x, y)) in slot.cell_coords().into_iter().enumerate() {
            letters[y][x] = words.get(word_id).letters.get(cell_idx).copied();
        }
    }

    letters
}

/// Turn the given grid and assignment into a rendered string, with blocked
/// cells drawn as full blocks and unfilled open cells as dots.
pub fn render_grid(grid: &Grid, words: &WordList, assignment: &Assignment) -> String {
    let letters = letter_grid(grid, words, assignment);

    let rendered: Vec<String> = (0..grid.height).map(|y| {
        (0..grid.width).map(|x| {
            if grid.is_open(x, y) {
                letters[y][x].unwrap_or('.')
            } else {
                '█'
            }
        }).collect()
    }).collect();

    rendered.join("\n")
}
