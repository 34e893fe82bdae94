//! Pending job loop
//!
//! 引擎的微任务队列只在宿主请求时推进，每次一个。

use crate::bindings::protocol::Slot;
use crate::scripting::engine::BridgeContext;

/// 单步执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Ran,
    Idle,
    /// 任务抛出异常，附渲染后的文本
    Threw(String),
}

impl JobStatus {
    /// 协议返回码：1 / 0 / -1
    pub fn code(&self) -> i32 {
        match self {
            JobStatus::Ran => 1,
            JobStatus::Idle => 0,
            JobStatus::Threw(_) => -1,
        }
    }
}

/// 一次排空的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub ran: usize,
    pub errors: Vec<String>,
}

impl BridgeContext {
    pub fn step_job(&mut self) -> JobStatus {
        match self.run_one_job() {
            1 => JobStatus::Ran,
            0 => JobStatus::Idle,
            _ => match self.result() {
                Slot::String(text) => JobStatus::Threw(text.clone()),
                _ => JobStatus::Threw(String::new()),
            },
        }
    }

    /// 反复单步直到队列为空；抛出异常的任务也计入 `ran`
    pub fn drain_jobs(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            match self.step_job() {
                JobStatus::Idle => break,
                JobStatus::Ran => report.ran += 1,
                JobStatus::Threw(text) => {
                    tracing::warn!(target: "js_script::jobs", %text, "pending job threw");
                    report.ran += 1;
                    report.errors.push(text);
                }
            }
        }
        tracing::debug!(target: "js_script::jobs", ran = report.ran, errors = report.errors.len(), "jobs drained");
        report
    }
}
