//! Capture buffers

/// A region of memory that the primary channel fills with samples
///
/// A `CaptureBuffer` is a bus address and a length in 32-bit words. It
/// stands for exclusive ownership of that memory: once handed to a
/// [`Capture`](crate::Capture), the DMA controller may write anywhere in
/// it at any time, so nothing else may touch it.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureBuffer {
    origin: u32,
    words: usize,
}

impl CaptureBuffer {
    /// Describe `words` 32-bit words starting at bus address `origin`
    ///
    /// # Safety
    ///
    /// The region must be valid, writable SRAM for as long as any capture
    /// using it may run, and nothing else may access it during that time.
    pub const unsafe fn from_raw_parts(origin: u32, words: usize) -> Self {
        CaptureBuffer { origin, words }
    }

    /// Take over a static buffer
    #[cfg(target_pointer_width = "32")]
    pub fn from_static(buffer: &'static mut [u32]) -> Self {
        // Safety: the exclusive, 'static borrow is consumed here, so no
        // other code can reach the memory again.
        unsafe { Self::from_raw_parts(buffer.as_mut_ptr() as u32, buffer.len()) }
    }

    /// Bus address of the first word
    pub const fn origin(&self) -> u32 {
        self.origin
    }

    /// Capacity in words
    pub const fn len(&self) -> usize {
        self.words
    }

    pub const fn is_empty(&self) -> bool {
        self.words == 0
    }

    /// Bus address of word `index`, if it's inside the buffer
    pub const fn address_of(&self, index: usize) -> Option<u32> {
        if index < self.words {
            Some(self.origin + 4 * index as u32)
        } else {
            None
        }
    }

    /// Bus address one past the last word
    pub const fn end(&self) -> u32 {
        self.origin + 4 * self.words as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_stay_in_bounds() {
        let buffer = unsafe { CaptureBuffer::from_raw_parts(0x2000_1000, 4) };
        assert_eq!(buffer.address_of(0), Some(0x2000_1000));
        assert_eq!(buffer.address_of(3), Some(0x2000_100C));
        assert_eq!(buffer.address_of(4), None);
        assert_eq!(buffer.end(), 0x2000_1010);
        assert!(!buffer.is_empty());
    }
}
