use crossbeam::channel::TryRecvError;
use std::cell::Cell;
use std::path::Path;

use crate::libs::{compress, external, writer};

/// A unit of work whose completion is witnessed by its output file.
/// Each kind carries a typed payload and is matched in [`Task::run`].
#[derive(Debug, Clone)]
pub enum Task {
    MafftBackbone {
        unaligned: String,
        output: String,
        threads: usize,
    },
    HmmBuild {
        alignment: String,
        output: String,
    },
    HmmAlign {
        hmm_model: String,
        queries: String,
        output: String,
    },
    CompressSubalignment {
        subalignment: String,
        output: String,
    },
    InducedSubalignment {
        columns: String,
        subalignment: String,
        output: String,
    },
}

impl Task {
    pub fn output_file(&self) -> &str {
        match self {
            Task::MafftBackbone { output, .. } => output,
            Task::HmmBuild { output, .. } => output,
            Task::HmmAlign { output, .. } => output,
            Task::CompressSubalignment { output, .. } => output,
            Task::InducedSubalignment { output, .. } => output,
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match self {
            Task::MafftBackbone {
                unaligned,
                output,
                threads,
            } => external::run_mafft(unaligned, output, *threads),
            Task::HmmBuild { alignment, output } => external::run_hmmbuild(alignment, output),
            Task::HmmAlign {
                hmm_model,
                queries,
                output,
            } => external::run_hmmalign(hmm_model, queries, output),
            Task::CompressSubalignment {
                subalignment,
                output,
            } => compress::compress_subalignment(subalignment, output),
            Task::InducedSubalignment {
                columns,
                subalignment,
                output,
            } => writer::build_induced_subalignment(columns, subalignment, output),
        }
    }

    /// Runs the task unless its output already exists (resumability).
    pub fn ensure(&self) -> anyhow::Result<()> {
        if Path::new(self.output_file()).exists() {
            log::info!("Existing output found, skipping: {}", self.output_file());
            return Ok(());
        }
        self.run()
            .map_err(|e| e.context(format!("task failed, output {}", self.output_file())))
    }
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

const MAX_NESTING: usize = 8;

/// Bounded worker pool with `submit`/`as_completed` semantics over
/// [`Task`]s. The submitting thread steals pending tasks while it waits
/// instead of idling, so a single-threaded run still makes progress when
/// a completion handler submits nested batches.
pub struct TaskRunner {
    threads: usize,
}

impl TaskRunner {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn run_all(&self, tasks: Vec<Task>) -> anyhow::Result<()> {
        self.for_each_completed(tasks, |_| Ok(()))
    }

    /// Executes all tasks, invoking `on_complete` on the submitting thread
    /// as each finishes, in completion order. The first error aborts the
    /// batch.
    pub fn for_each_completed<F>(&self, tasks: Vec<Task>, mut on_complete: F) -> anyhow::Result<()>
    where
        F: FnMut(Task) -> anyhow::Result<()>,
    {
        if tasks.is_empty() {
            return Ok(());
        }

        // Deeply nested batches run inline; the pool is not re-entrant
        // without bound.
        let depth = NESTING.with(|n| n.get());
        if depth >= MAX_NESTING || self.threads == 1 {
            for task in tasks {
                task.ensure()?;
                on_complete(task)?;
            }
            return Ok(());
        }
        NESTING.with(|n| n.set(depth + 1));
        let result = self.run_parallel(tasks, &mut on_complete);
        NESTING.with(|n| n.set(depth));

        result
    }

    fn run_parallel<F>(&self, tasks: Vec<Task>, on_complete: &mut F) -> anyhow::Result<()>
    where
        F: FnMut(Task) -> anyhow::Result<()>,
    {
        let total = tasks.len();
        let (task_snd, task_rcv) = crossbeam::channel::unbounded::<Task>();
        let (done_snd, done_rcv) = crossbeam::channel::unbounded::<anyhow::Result<Task>>();
        for task in tasks {
            task_snd.send(task).unwrap();
        }
        drop(task_snd);

        crossbeam::scope(|s| -> anyhow::Result<()> {
            for _ in 0..self.threads - 1 {
                let (rcv, snd) = (task_rcv.clone(), done_snd.clone());
                s.spawn(move |_| {
                    for task in rcv.iter() {
                        let result = task.ensure().map(|_| task);
                        // receiver gone means the batch already failed
                        if snd.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_snd);

            let mut completed = 0;
            while completed < total {
                match done_rcv.try_recv() {
                    Ok(result) => {
                        completed += 1;
                        on_complete(result?)?;
                    }
                    Err(TryRecvError::Empty) => {
                        // steal a pending task rather than idling
                        if let Ok(task) = task_rcv.try_recv() {
                            let result = task.ensure().map(|_| task);
                            completed += 1;
                            on_complete(result?)?;
                        } else if let Ok(result) = done_rcv.recv() {
                            completed += 1;
                            on_complete(result?)?;
                        } else {
                            break;
                        }
                    }
                    Err(TryRecvError::Disconnected) => break,
                }
            }
            Ok(())
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_output_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("done.txt");
        std::fs::write(&output, "present").unwrap();

        // would fail if actually executed: the input does not exist
        let task = Task::CompressSubalignment {
            subalignment: "no_such_file.fa".to_string(),
            output: output.to_str().unwrap().to_string(),
        };
        assert!(task.ensure().is_ok());
    }

    #[test]
    fn completion_order_covers_all_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = Vec::new();
        for i in 0..4 {
            let sub = dir.path().join(format!("sub_{}.fa", i));
            std::fs::write(&sub, ">a\nAC-T\n>b\nACGT\n").unwrap();
            tasks.push(Task::CompressSubalignment {
                subalignment: sub.to_str().unwrap().to_string(),
                output: dir
                    .path()
                    .join(format!("comp_{}.txt", i))
                    .to_str()
                    .unwrap()
                    .to_string(),
            });
        }

        let runner = TaskRunner::new(3);
        let mut seen = 0;
        runner
            .for_each_completed(tasks, |task| {
                assert!(Path::new(task.output_file()).exists());
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 4);
    }
}
