
/// Sent by the bootloader while it waits for a host
pub const TOKEN_READY: &str = "c3r3s";
/// Host request to start a new boot
pub const TOKEN_BOOT: &str = "boot";
/// Bootloader acknowledgement of a boot request
pub const TOKEN_LISTEN: &str = "lstn";
/// Host announcement of an incoming image
pub const TOKEN_SEND: &str = "send";
/// Checksum accepted by the bootloader
pub const TOKEN_GOOD: &str = "good";
/// Checksum rejected by the bootloader
pub const TOKEN_FAIL: &str = "fail";

/// Address the image is copied to, must match the kernel linker script
pub const LOAD_ADDRESS: i32 = 0x80000;

/// Block length used unless the image is too large for `MAX_BLOCK_COUNT` of them
pub const DEFAULT_BLOCK_LENGTH: usize = 256;

pub const MAX_BLOCK_COUNT: usize = 100;

pub const DEFAULT_BAUD: usize = 115200;

/// Compute the on-wire length of every block for an image of `image_size` bytes
pub fn block_length(image_size: usize) -> usize {
    core::cmp::max(DEFAULT_BLOCK_LENGTH, image_size / MAX_BLOCK_COUNT)
}

/// Compute the number of blocks an image of `image_size` bytes is split into.
///
/// An empty image still produces a single (fully padded) block.
pub fn block_count(image_size: usize) -> usize {
    let len = block_length(image_size);
    core::cmp::max(1, (image_size + len - 1) / len)
}

/// CRC-32 over the unpadded image
pub fn checksum(image: &[u8]) -> u32 {
    crc32fast::hash(image)
}

/// A single chunk of the image
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Block<'a> {
    pub index: usize,
    /// Unpadded image data
    pub data: &'a [u8],
    /// On-wire length, including padding
    pub length: usize,
}

impl<'a> Block<'a> {
    /// Number of zero bytes appended to `data` on the wire
    pub fn padding(&self) -> usize {
        self.length - self.data.len()
    }

    /// Cumulative byte count the device reports once this block is received
    pub fn expected_ack(&self) -> usize {
        (self.index + 1) * self.length
    }
}

/// Iterator splitting an image into uniformly sized blocks
#[derive(Clone, Debug)]
pub struct Blocks<'a> {
    image: &'a [u8],
    length: usize,
    index: usize,
    count: usize,
}

impl<'a> Blocks<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            image,
            length: block_length(image.len()),
            index: 0,
            count: block_count(image.len()),
        }
    }

    /// On-wire length shared by all blocks
    pub fn block_length(&self) -> usize {
        self.length
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }

        let start = core::cmp::min(self.index * self.length, self.image.len());
        let end = core::cmp::min(start + self.length, self.image.len());

        let block = Block {
            index: self.index,
            data: &self.image[start..end],
            length: self.length,
        };

        self.index += 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Blocks<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_length_grows_with_large_images() {
        assert_eq!(block_length(0), 256);
        assert_eq!(block_length(10), 256);
        assert_eq!(block_length(25_600), 256);
        assert_eq!(block_length(25_699), 256);
        assert_eq!(block_length(30_000), 300);
        assert_eq!(block_length(1_000_000), 10_000);
    }

    #[test]
    fn small_image_is_single_padded_block() {
        let image = [0xAAu8; 10];
        let blocks: Vec<_> = Blocks::new(&image).collect();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].length, 256);
        assert_eq!(blocks[0].data, &image[..]);
        assert_eq!(blocks[0].padding(), 246);
        assert_eq!(blocks[0].expected_ack(), 256);
    }

    #[test]
    fn empty_image_is_single_zero_block() {
        let blocks: Vec<_> = Blocks::new(&[]).collect();

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].data.is_empty());
        assert_eq!(blocks[0].padding(), 256);
    }

    #[test]
    fn exact_multiple_has_no_padding() {
        let image = vec![1u8; 512];
        let blocks: Vec<_> = Blocks::new(&image).collect();

        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.padding() == 0));
    }

    #[test]
    fn large_image_uses_hundred_blocks() {
        let image = vec![7u8; 30_000];
        let blocks = Blocks::new(&image);

        assert_eq!(blocks.block_length(), 300);
        assert_eq!(blocks.len(), 100);

        let acks: Vec<_> = blocks.map(|b| b.expected_ack()).collect();
        assert_eq!(acks.first(), Some(&300));
        assert_eq!(acks.last(), Some(&30_000));
        assert!(acks.windows(2).all(|w| w[1] - w[0] == 300));
    }

    #[test]
    fn uneven_large_image_spills_into_extra_block() {
        let image = vec![7u8; 30_050];
        let blocks: Vec<_> = Blocks::new(&image).collect();

        assert_eq!(blocks.len(), 101);
        assert_eq!(blocks[100].data.len(), 50);
        assert_eq!(blocks[100].padding(), 250);
    }

    #[test]
    fn block_count_matches_iteration() {
        for size in &[0usize, 1, 255, 256, 257, 25_600, 25_601, 30_000, 99_999, 123_457] {
            let image = vec![0u8; *size];
            let blocks = Blocks::new(&image);
            let len = blocks.block_length();

            let expected = core::cmp::max(1, (size + len - 1) / len);

            assert_eq!(block_count(*size), expected, "size {}", size);
            assert_eq!(blocks.len(), block_count(*size));
            assert!(Blocks::new(&image).all(|b| b.length == len));
        }
    }

    #[test]
    fn blocks_reassemble_image() {
        let image: Vec<u8> = (0..70_001u32).map(|i| (i * 31 % 251) as u8).collect();
        let joined: Vec<u8> = Blocks::new(&image)
            .flat_map(|b| b.data.iter().copied())
            .collect();

        assert_eq!(joined, image);
    }

    #[test]
    fn only_last_block_is_short() {
        let image = vec![3u8; 1000];
        let blocks: Vec<_> = Blocks::new(&image).collect();
        let (last, rest) = blocks.split_last().unwrap();

        assert!(rest.iter().all(|b| b.data.len() == b.length));
        assert_eq!(last.data.len(), 1000 - 3 * 256);
    }

    #[test]
    fn checksum_is_standard_crc32() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn checksum_ignores_padding() {
        let short = [1u8, 2, 3];
        let padded = [1u8, 2, 3, 0, 0];

        assert_ne!(checksum(&short), checksum(&padded));
    }
}
