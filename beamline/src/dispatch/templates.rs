//! Batch-cluster script templates.
//!
//! The array script runs one task per array element: it starts the
//! simulator and a watcher process that tails the log and POSTs update
//! envelopes to the callback address. The collect script runs after the
//! whole array has exited (any status), converts the replica outputs and
//! pushes them, with the merge-phase transitions, through the same
//! boundary. Both embed the job id and update key so the remote side can
//! authenticate its writes.

/// Script for one element of the worker array.
pub const ARRAY_SCRIPT: &str = r#"#!/bin/bash
WORK_DIR=$ROOT_DIR/workspaces/task_`printf %04d $SLURM_ARRAY_TASK_ID`
INPUT_DIR=$ROOT_DIR/input

mkdir -p $WORK_DIR
cd $WORK_DIR
ln -s $INPUT_DIR/* .

# seed of RNG
RNG_SEED=$SLURM_ARRAY_TASK_ID

FILE_TO_WATCH=$WORK_DIR/{sim_executable}_`printf %04d $SLURM_ARRAY_TASK_ID`.log
$ROOT_DIR/bin/watcher --filepath=$FILE_TO_WATCH \
    --job_id={job_id} --task_id=$SLURM_ARRAY_TASK_ID \
    --update_key={update_key} --backend_url={callback_url} &

{sim_executable} -N $RNG_SEED $WORK_DIR &

wait
"#;

/// Script for the dependent collect job.
pub const COLLECT_SCRIPT: &str = r#"#!/bin/bash
INPUT_WILDCARD=$ROOT_DIR/workspaces/task_*/*.bdo
OUTPUT_DIRECTORY=$ROOT_DIR/output

$ROOT_DIR/bin/notify --job_id={job_id} --update_key={update_key} \
    --backend_url={callback_url} --job_state=MERGING_RUNNING

mkdir -p $OUTPUT_DIRECTORY
cd $OUTPUT_DIRECTORY

$ROOT_DIR/bin/convertmc json --many "$INPUT_WILDCARD"

$ROOT_DIR/bin/result_sender --job_id={job_id} --update_key={update_key} \
    --backend_url={callback_url} --output_dir=$OUTPUT_DIRECTORY
"#;

/// Fills `{name}` placeholders in a script template.
///
/// Unknown placeholders are left in place; the schedulers' own `$VAR`
/// expansions are untouched because they use a different syntax.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut script = template.to_string();
    for (name, value) in vars {
        script = script.replace(&format!("{{{name}}}"), value);
    }
    script
}
