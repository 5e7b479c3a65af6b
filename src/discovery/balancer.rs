//! 负载均衡
//!
//! 从地址快照中选出一个地址，游标独立于快照保存，快照替换后继续轮询

use crate::config::BalancePolicy;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// 负载均衡器
#[derive(Debug)]
pub struct Balancer {
    policy: BalancePolicy,
    cursor: AtomicU64,
}

impl Balancer {
    /// 创建新的负载均衡器
    pub fn new(policy: BalancePolicy) -> Self {
        Self {
            policy,
            cursor: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// 选择一个地址，空集合返回 None
    pub fn pick<'a>(&self, addresses: &'a [String]) -> Option<&'a str> {
        match addresses.len() {
            0 => None,
            1 => Some(addresses[0].as_str()),
            len => {
                let index = match self.policy {
                    BalancePolicy::RoundRobin => self.next_round_robin(len),
                    BalancePolicy::Random => rand::thread_rng().gen_range(0..len),
                };
                addresses.get(index).map(String::as_str)
            }
        }
    }

    /// 轮询选择：并发调用方各自拿到不同的游标值
    fn next_round_robin(&self, len: usize) -> usize {
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        (cursor % len as u64) as usize
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new(BalancePolicy::RoundRobin)
    }
}
