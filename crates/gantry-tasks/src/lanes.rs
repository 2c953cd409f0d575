//! Lane matrix: parallel lanes of step-aligned task slots
//!
//! Execution walks the matrix column by column. A column index is shared by
//! every lane, so placing a task at column `j` of lane `k` means it starts
//! together with every other lane's task at column `j`. Placeholder slots
//! (`None`) keep a later task in the right column and are never sent to a
//! worker.

use std::sync::Arc;

use tracing::debug;

use gantry_core::error::TaskError;

use crate::task::Task;

/// One lane entry; `None` is a placeholder
pub type Slot = Option<Arc<Task>>;

/// An ordered sequence of task slots
#[derive(Debug, Clone, Default)]
pub struct Lane {
    slots: Vec<Slot>,
}

impl Lane {
    /// Number of slots, placeholders included
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the lane has no slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of real tasks
    pub fn task_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the lane holds at least one real task
    pub fn has_tasks(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Task at `column`, if the slot exists and is not a placeholder
    pub fn task(&self, column: usize) -> Option<&Arc<Task>> {
        self.slots.get(column).and_then(Option::as_ref)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    fn push(&mut self, task: Arc<Task>) -> usize {
        self.slots.push(Some(task));
        self.slots.len() - 1
    }
}

#[derive(Debug, Clone, Copy)]
struct ParallelBlock {
    anchor: usize,
    started: bool,
}

/// Where a pushed task landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub lane: usize,
    pub column: usize,
}

/// Ordered collection of lanes built before a run
#[derive(Debug, Clone)]
pub struct LaneMatrix {
    lanes: Vec<Lane>,
    active: usize,
    block: Option<ParallelBlock>,
}

impl Default for LaneMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneMatrix {
    /// A single empty lane, active
    pub fn new() -> Self {
        Self {
            lanes: vec![Lane::default()],
            active: 0,
            block: None,
        }
    }

    /// Number of lanes, empty ones included
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_pending_work()
    }

    pub fn lane(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Index of the lane receiving sequential tasks
    pub fn active_lane(&self) -> usize {
        self.active
    }

    pub fn in_parallel(&self) -> bool {
        self.block.is_some()
    }

    /// Whether any lane holds a real task
    pub fn has_pending_work(&self) -> bool {
        self.lanes.iter().any(Lane::has_tasks)
    }

    /// Open a new lane unless the active one is still empty
    pub fn new_lane(&mut self) -> Result<usize, TaskError> {
        if self.block.is_some() {
            return Err(TaskError::ParallelBlock(
                "cannot open a lane inside a parallel block".to_string(),
            ));
        }

        if self.lanes[self.active].is_empty() {
            return Ok(self.active);
        }

        self.lanes.push(Lane::default());
        self.active = self.lanes.len() - 1;
        debug!(lane = self.active, "opened lane");
        Ok(self.active)
    }

    /// Start a parallel block anchored on the active lane.
    ///
    /// The first task pushed in the block goes to the anchor itself; each
    /// later one opens a new lane aligned to the anchor's last column.
    pub fn begin_parallel(&mut self) -> Result<(), TaskError> {
        if self.block.is_some() {
            return Err(TaskError::ParallelBlock(
                "a parallel block is already open".to_string(),
            ));
        }
        self.block = Some(ParallelBlock {
            anchor: self.active,
            started: false,
        });
        Ok(())
    }

    /// Close the parallel block; the anchor becomes active again
    pub fn end_parallel(&mut self) -> Result<(), TaskError> {
        let block = self.block.take().ok_or_else(|| {
            TaskError::ParallelBlock("no parallel block is open".to_string())
        })?;
        self.active = block.anchor;
        Ok(())
    }

    /// Queue a task according to the current lane pointer
    pub fn push(&mut self, task: Task) -> Result<Placement, TaskError> {
        let task = Arc::new(task);

        let lane = match self.block {
            Some(ParallelBlock {
                anchor,
                started: true,
            }) => {
                self.lanes.push(Lane::default());
                let lane = self.lanes.len() - 1;
                if let Err(e) = self.align(lane, anchor) {
                    self.lanes.pop();
                    return Err(e);
                }
                lane
            }
            Some(ref mut block) => {
                block.started = true;
                block.anchor
            }
            None => self.active,
        };

        let column = self.lanes[lane].push(task);
        debug!(lane, column, "queued task");
        Ok(Placement { lane, column })
    }

    /// Pad `lane` with placeholders so its next task lands in the last
    /// column of `primary`.
    ///
    /// Fails when `lane` is already at least as long as `primary`.
    pub fn align(&mut self, lane: usize, primary: usize) -> Result<(), TaskError> {
        let primary_len = self.lanes.get(primary).map(Lane::len).unwrap_or(0);
        let lane_len = self.lanes.get(lane).map(Lane::len).unwrap_or(0);

        if lane >= self.lanes.len() || lane_len >= primary_len {
            return Err(TaskError::LaneOverrun {
                lane,
                lane_len,
                primary,
                primary_len,
            });
        }

        let slots = &mut self.lanes[lane].slots;
        slots.resize(primary_len - 1, None);
        Ok(())
    }

    /// Back to a single empty lane
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Drain the matrix into an execution plan and reset it
    pub fn take_plan(&mut self) -> ExecutionPlan {
        let lanes = std::mem::take(&mut self.lanes);
        self.reset();
        ExecutionPlan::from_lanes(lanes)
    }

    /// Column view, one line per lane
    pub fn render(&self) -> String {
        render_lanes(self.lanes.iter().enumerate())
    }
}

/// A lane that survived trimming, with its original index
#[derive(Debug, Clone)]
pub struct PlannedLane {
    pub index: usize,
    pub lane: Lane,
}

/// Trimmed lanes ready for execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    lanes: Vec<PlannedLane>,
    steps: usize,
}

impl ExecutionPlan {
    /// Drop lanes without real tasks and compute the step count
    pub fn from_lanes(lanes: Vec<Lane>) -> Self {
        let lanes: Vec<PlannedLane> = lanes
            .into_iter()
            .enumerate()
            .filter(|(_, lane)| lane.has_tasks())
            .map(|(index, lane)| PlannedLane { index, lane })
            .collect();
        let steps = lanes.iter().map(|l| l.lane.len()).max().unwrap_or(0);
        Self { lanes, steps }
    }

    pub fn lanes(&self) -> &[PlannedLane] {
        &self.lanes
    }

    /// Length of the longest lane
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of real tasks across all lanes
    pub fn task_count(&self) -> usize {
        self.lanes.iter().map(|l| l.lane.task_count()).sum()
    }

    pub fn render(&self) -> String {
        render_lanes(self.lanes.iter().map(|l| (l.index, &l.lane)))
    }
}

fn render_lanes<'a>(lanes: impl Iterator<Item = (usize, &'a Lane)>) -> String {
    let mut out = String::new();
    for (index, lane) in lanes {
        let cells: Vec<String> = lane
            .slots()
            .iter()
            .map(|slot| match slot {
                Some(task) => task.to_string(),
                None => "-".to_string(),
            })
            .collect();
        out.push_str(&format!("lane {}: {}\n", index, cells.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostRegistry;

    fn task(command: &str) -> Task {
        let mut registry = HostRegistry::new();
        registry.add("h1", ["all"]).unwrap();
        Task::execute(&registry, command, None, None, 60).unwrap()
    }

    fn commands(lane: &Lane) -> Vec<Option<String>> {
        lane.slots()
            .iter()
            .map(|s| s.as_ref().and_then(|t| t.command().map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_default_state() {
        let matrix = LaneMatrix::new();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.active_lane(), 0);
        assert!(!matrix.has_pending_work());
    }

    #[test]
    fn test_sequential_push() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        let placement = matrix.push(task("b")).unwrap();

        assert_eq!(placement, Placement { lane: 0, column: 1 });
        assert!(matrix.has_pending_work());
        assert_eq!(matrix.lane(0).unwrap().task_count(), 2);
    }

    #[test]
    fn test_new_lane_reuses_empty_active_lane() {
        let mut matrix = LaneMatrix::new();
        assert_eq!(matrix.new_lane().unwrap(), 0);
        assert_eq!(matrix.new_lane().unwrap(), 0);
        assert_eq!(matrix.len(), 1);

        matrix.push(task("a")).unwrap();
        assert_eq!(matrix.new_lane().unwrap(), 1);
        assert_eq!(matrix.new_lane().unwrap(), 1);
        assert_eq!(matrix.len(), 2);

        let placement = matrix.push(task("b")).unwrap();
        assert_eq!(placement, Placement { lane: 1, column: 0 });
    }

    #[test]
    fn test_parallel_block_first_task_goes_to_anchor() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("before")).unwrap();

        matrix.begin_parallel().unwrap();
        let first = matrix.push(task("p1")).unwrap();
        let second = matrix.push(task("p2")).unwrap();
        let third = matrix.push(task("p3")).unwrap();
        matrix.end_parallel().unwrap();

        let after = matrix.push(task("after")).unwrap();

        assert_eq!(first, Placement { lane: 0, column: 1 });
        assert_eq!(second, Placement { lane: 1, column: 1 });
        assert_eq!(third, Placement { lane: 2, column: 1 });
        assert_eq!(after, Placement { lane: 0, column: 2 });

        assert_eq!(
            commands(matrix.lane(1).unwrap()),
            vec![None, Some("p2".to_string())]
        );
        assert_eq!(matrix.active_lane(), 0);
    }

    #[test]
    fn test_parallel_block_on_empty_matrix() {
        let mut matrix = LaneMatrix::new();
        matrix.begin_parallel().unwrap();
        matrix.push(task("a")).unwrap();
        matrix.push(task("b")).unwrap();
        matrix.end_parallel().unwrap();

        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.lane(1).unwrap().len(), 1);
    }

    #[test]
    fn test_parallel_block_anchored_on_second_lane() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.new_lane().unwrap();
        matrix.push(task("b1")).unwrap();
        matrix.push(task("b2")).unwrap();

        matrix.begin_parallel().unwrap();
        matrix.push(task("p1")).unwrap();
        let p2 = matrix.push(task("p2")).unwrap();
        matrix.end_parallel().unwrap();

        assert_eq!(p2, Placement { lane: 2, column: 2 });
        assert_eq!(matrix.active_lane(), 1);
    }

    #[test]
    fn test_nested_parallel_rejected() {
        let mut matrix = LaneMatrix::new();
        matrix.begin_parallel().unwrap();
        assert!(matches!(
            matrix.begin_parallel(),
            Err(TaskError::ParallelBlock(_))
        ));
        assert!(matches!(matrix.new_lane(), Err(TaskError::ParallelBlock(_))));
    }

    #[test]
    fn test_unmatched_end_rejected() {
        let mut matrix = LaneMatrix::new();
        assert!(matches!(
            matrix.end_parallel(),
            Err(TaskError::ParallelBlock(_))
        ));
    }

    #[test]
    fn test_empty_parallel_block_is_noop() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.begin_parallel().unwrap();
        matrix.end_parallel().unwrap();
        let next = matrix.push(task("b")).unwrap();
        assert_eq!(next, Placement { lane: 0, column: 1 });
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn test_align_pads_to_primary_column() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.push(task("b")).unwrap();
        matrix.push(task("c")).unwrap();
        matrix.new_lane().unwrap();

        matrix.align(1, 0).unwrap();
        assert_eq!(matrix.lane(1).unwrap().len(), 2);
        assert!(!matrix.lane(1).unwrap().has_tasks());
    }

    #[test]
    fn test_align_overrun() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.new_lane().unwrap();
        matrix.push(task("b")).unwrap();
        matrix.push(task("c")).unwrap();

        assert_eq!(
            matrix.align(1, 0),
            Err(TaskError::LaneOverrun {
                lane: 1,
                lane_len: 2,
                primary: 0,
                primary_len: 1,
            })
        );
        assert!(matches!(
            matrix.align(0, 0),
            Err(TaskError::LaneOverrun { .. })
        ));
    }

    #[test]
    fn test_take_plan_trims_and_resets() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.push(task("b")).unwrap();
        matrix.new_lane().unwrap();
        matrix.push(task("c")).unwrap();
        matrix.new_lane().unwrap();
        matrix.new_lane().unwrap();

        let plan = matrix.take_plan();
        assert_eq!(plan.lanes().len(), 2);
        assert_eq!(plan.steps(), 2);
        assert_eq!(plan.task_count(), 3);
        assert_eq!(plan.lanes()[1].index, 1);

        assert!(!matrix.has_pending_work());
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.active_lane(), 0);
    }

    #[test]
    fn test_plan_of_empty_matrix() {
        let plan = LaneMatrix::new().take_plan();
        assert!(plan.is_empty());
        assert_eq!(plan.steps(), 0);
    }

    #[test]
    fn test_reset_closes_block() {
        let mut matrix = LaneMatrix::new();
        matrix.begin_parallel().unwrap();
        matrix.push(task("a")).unwrap();
        matrix.reset();
        assert!(!matrix.in_parallel());
        assert!(!matrix.has_pending_work());
    }

    #[test]
    fn test_render() {
        let mut matrix = LaneMatrix::new();
        matrix.push(task("a")).unwrap();
        matrix.begin_parallel().unwrap();
        matrix.push(task("b")).unwrap();
        matrix.push(task("c")).unwrap();
        matrix.end_parallel().unwrap();

        assert_eq!(
            matrix.render(),
            "lane 0: CMD a | CMD b\nlane 1: - | CMD c\n"
        );
    }
}
