//! Map-Reduce over Frames
//!
//! A map-reduce job is a distributed task whose keys are the chunk keys of a
//! frame's first column. Each node maps the chunks it homes, one fresh copy of
//! the job per chunk, and folds the per-chunk partials in chunk order before
//! the fork-join tree folds them across nodes. All three levels use the same
//! `MrTask::reduce`.
//!
//! Output columns are staged per chunk, frozen into compact encodings and
//! stored next to the input chunks, then added to the frame once every node
//! has finished.

pub mod task;

#[cfg(test)]
mod tests;
