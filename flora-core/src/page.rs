use serde::{Deserialize, Serialize};

/// Page selector for list operations. Pages are 1-based.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }.clamped()
    }

    /// Page >= 1, limit in 1..=100.
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> usize {
        let p = self.clamped();
        (p.page as usize - 1) * p.limit as usize
    }
}

/// List responses carry the page they answer plus total counts.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let request = request.clamped();
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            pages: total.div_ceil(request.limit as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        let req = PageRequest::new(3, 20);
        assert_eq!(req.offset(), 40);

        let page = Page::new(vec![1, 2, 3], req, 43);
        assert_eq!(page.pages, 3);
        assert_eq!(page.total, 43);
    }

    #[test]
    fn clamps_degenerate_requests() {
        let req = PageRequest { page: 0, limit: 0 }.clamped();
        assert_eq!((req.page, req.limit), (1, 1));
        assert_eq!(PageRequest { page: 1, limit: 500 }.clamped().limit, 100);
    }
}
