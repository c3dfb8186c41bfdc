//! 交互式搜索会话
//!
//! 同一会话的新查询会中止上一次仍在进行的查询，包括其中的编码器请求。
//! 即使旧查询在新查询开始后才完成，它的结果也会被丢弃。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::task::AbortHandle;

use super::{QueryRouter, Routed, SearchQuery};
use crate::error::{Error, Result};

#[derive(Debug)]
pub enum LiveOutcome<T = Routed> {
    Completed(T),
    /// 被同一会话中更新的查询取代
    Superseded,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Sessions {
    next_generation: u64,
    in_flight: HashMap<String, InFlight>,
}

pub struct LiveSearch {
    router: Arc<QueryRouter>,
    sessions: Arc<Mutex<Sessions>>,
}

impl LiveSearch {
    pub fn new(router: Arc<QueryRouter>) -> Self {
        Self { router, sessions: Default::default() }
    }

    pub async fn search(&self, session: &str, query: SearchQuery) -> Result<LiveOutcome> {
        let router = self.router.clone();
        run_superseding(&self.sessions, session, async move { router.search(&query).await }).await
    }
}

/// 在后台任务中执行 `fut`，并中止同一会话中之前的任务
async fn run_superseding<T, F>(
    sessions: &Arc<Mutex<Sessions>>,
    session: &str,
    fut: F,
) -> Result<LiveOutcome<T>>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    // 在同一次加锁中分配代数并登记任务，保证后提交的查询一定取代先提交的查询
    let (generation, handle) = {
        let mut guard = sessions.lock().unwrap_or_else(PoisonError::into_inner);
        guard.next_generation += 1;
        let generation = guard.next_generation;
        let handle = tokio::spawn(fut);
        let current = InFlight { generation, abort: handle.abort_handle() };
        if let Some(previous) = guard.in_flight.insert(session.to_string(), current) {
            debug!("会话 {session} 的查询 #{} 被 #{generation} 取代", previous.generation);
            previous.abort.abort();
        }
        (generation, handle)
    };

    let joined = handle.await;

    let latest = {
        let mut guard = sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let latest = guard.in_flight.get(session).is_some_and(|f| f.generation == generation);
        if latest {
            guard.in_flight.remove(session);
        }
        latest
    };

    match joined {
        Ok(result) if latest => result.map(LiveOutcome::Completed),
        Ok(_) => Ok(LiveOutcome::Superseded),
        Err(e) if e.is_cancelled() => Ok(LiveOutcome::Superseded),
        Err(e) => Err(Error::Task(e.to_string())),
    }
}
