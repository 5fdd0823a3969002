//! worker 地址池

use std::net::Ipv4Addr;

/// 有序的 worker 地址列表，下标即 worker 编号
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerPool {
    addresses: Vec<String>,
}

impl WorkerPool {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }

    /// 从起始地址开始的 count 个连续 IPv4 地址，越过 255.255.255.255 时返回 None
    pub fn from_range(start: Ipv4Addr, count: usize) -> Option<Self> {
        let base = u32::from(start);
        let addresses = (0..count)
            .map(|offset| {
                u32::try_from(offset)
                    .ok()
                    .and_then(|offset| base.checked_add(offset))
                    .map(|addr| Ipv4Addr::from(addr).to_string())
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { addresses })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.addresses.get(index).map(String::as_str)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.addresses.iter().map(String::as_str).enumerate()
    }
}
