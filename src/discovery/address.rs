//! 地址集合快照

/// 某一时刻的可用地址快照
///
/// 每次成功解析都整体替换，从不原地修改，读方看到的要么是旧快照要么是完整的新快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    addresses: Vec<String>,
    tags: Vec<String>,
}

impl AddressSet {
    pub fn new(addresses: Vec<String>, tags: Vec<String>) -> Self {
        Self { addresses, tags }
    }

    pub fn from_addresses(addresses: Vec<String>) -> Self {
        Self::new(addresses, Vec::new())
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// 最后一个成员的标签
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
