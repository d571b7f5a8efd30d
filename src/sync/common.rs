//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了后台订阅监听器的公共生命周期。

use crate::backend::remote::Subscription;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 监听器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Subscribed,
    Running,
    Unsubscribing,
    Stopped,
}

/// 消息处理器
///
/// 处理单条消息时的错误由处理器自己记录，不会终止监听循环
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// 监听器名称，用于日志和状态查询
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: String);
}

/// 运行中的监听器
pub struct ListenerHandle {
    pub name: &'static str,
    state: watch::Receiver<ListenerState>,
    join: JoinHandle<Result<()>>,
}

impl ListenerHandle {
    /// 当前状态
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// 状态订阅
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 等待任务结束并取回其结果
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(e) => Err(CacheError::Shutdown(format!(
                "{} listener task failed: {}",
                self.name, e
            ))),
        }
    }
}

/// 在已建立的订阅上启动监听循环
///
/// 调用时订阅已经完成，状态从 `Subscribed` 开始。循环在取消令牌触发时正常结束；
/// 订阅流出错或意外关闭时记录严重错误，取消订阅后返回 `ListenerFatal`
pub(crate) fn spawn_listener<H: MessageHandler>(
    handler: H,
    mut subscription: Box<dyn Subscription>,
    token: CancellationToken,
    state_tx: watch::Sender<ListenerState>,
) -> ListenerHandle {
    let name = handler.name();
    let state_rx = state_tx.subscribe();
    state_tx.send_replace(ListenerState::Subscribed);

    let join = tokio::spawn(async move {
        state_tx.send_replace(ListenerState::Running);
        info!("{} listener running", name);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("{} listener cancelled", name);
                    break Ok(());
                }
                message = subscription.next_message() => match message {
                    Some(Ok(payload)) => handler.handle(payload).await,
                    Some(Err(e)) => {
                        break Err(CacheError::ListenerFatal(format!("{}: {}", name, e)));
                    }
                    None => {
                        break Err(CacheError::ListenerFatal(format!(
                            "{}: subscription stream closed",
                            name
                        )));
                    }
                },
            }
        };

        state_tx.send_replace(ListenerState::Unsubscribing);
        if let Err(e) = subscription.unsubscribe().await {
            warn!("{} listener failed to unsubscribe: {}", name, e);
        }
        state_tx.send_replace(ListenerState::Stopped);

        match &outcome {
            Ok(()) => info!("{} listener stopped", name),
            Err(e) => error!("critical: {} listener terminated: {}", name, e),
        }
        outcome
    });

    ListenerHandle {
        name,
        state: state_rx,
        join,
    }
}

/// 后台任务集合
///
/// 持有取消令牌和所有监听器，`shutdown` 取消并等待它们全部结束。
/// 未调用 `shutdown` 就丢弃时只取消令牌，不等待监听器
pub struct BackgroundTasks {
    token: CancellationToken,
    listeners: Vec<ListenerHandle>,
}

impl BackgroundTasks {
    pub(crate) fn new(token: CancellationToken, listeners: Vec<ListenerHandle>) -> Self {
        Self { token, listeners }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    /// 按名称查询监听器状态
    pub fn state_of(&self, name: &str) -> Option<ListenerState> {
        self.listeners
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.state())
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// 取消并等待所有监听器，返回遇到的第一个错误
    pub async fn shutdown(mut self) -> Result<()> {
        self.token.cancel();
        let mut first_error = None;
        for listener in std::mem::take(&mut self.listeners) {
            if let Err(e) = listener.join().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
