use std::{ops::Deref, vec::Drain};

/// The smallest datagram that can be meaningfully sent.
pub(crate) const SMALLEST_VALID_DATAGRAM: &[u8] = b"a:0|c";

/// Packs datagrams into newline-separated packets.
///
/// StatsD servers split incoming packets on newlines, so any number of datagrams can share a single packet as long as
/// the packet stays under the transport's size ceiling. Packing them this way saves a system call, or an HTTP request,
/// per datagram.
///
/// Datagrams are appended to the current packet until the next one would push it past the maximum packet length, at
/// which point the current packet is finalized and a new one is started. A datagram that is larger than the maximum
/// packet length on its own can never be sent, and is rejected.
pub(crate) struct PacketWriter {
    max_packet_len: usize,
    packets_buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PacketWriter {
    /// Creates a new `PacketWriter` with the given maximum packet length.
    pub fn new(max_packet_len: usize) -> Self {
        debug_assert!(
            max_packet_len >= SMALLEST_VALID_DATAGRAM.len(),
            "maximum packet length must be {} or greater",
            SMALLEST_VALID_DATAGRAM.len()
        );

        Self { max_packet_len, packets_buf: Vec::new(), offsets: Vec::new() }
    }

    /// Returns the maximum packet length.
    pub fn max_packet_len(&self) -> usize {
        self.max_packet_len
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, unfinalized packet.
    fn current_packet_len(&self) -> usize {
        self.packets_buf.len() - self.last_offset()
    }

    /// Returns the number of bytes `datagram` would add to the current packet, including its separator.
    fn appended_len(&self, datagram: &[u8]) -> usize {
        if self.current_packet_len() == 0 {
            datagram.len()
        } else {
            datagram.len() + 1
        }
    }

    /// Finalizes the current packet so that the next write starts a new one.
    ///
    /// If the current packet is empty, this method does nothing.
    fn finalize_current_packet(&mut self) {
        if self.current_packet_len() == 0 {
            return;
        }

        self.offsets.push(self.packets_buf.len());
    }

    /// Returns `true` if nothing has been written since the packets were last taken.
    pub fn is_empty(&self) -> bool {
        self.packets_buf.is_empty()
    }

    /// Returns `true` if writing `datagram` would not fit in the current packet.
    ///
    /// Callers that want to send packets as soon as they fill up can check this before writing and take the packets
    /// first.
    pub fn would_overflow(&self, datagram: &[u8]) -> bool {
        let datagram = trim_line_ending(datagram);
        self.current_packet_len() > 0
            && self.current_packet_len() + self.appended_len(datagram) > self.max_packet_len
    }

    /// Writes a datagram into the current packet, starting a new packet first if it would not fit.
    ///
    /// Trailing line endings are stripped, and empty datagrams are ignored.
    ///
    /// Returns `false` if the datagram is larger than the maximum packet length, in which case it is discarded.
    pub fn write(&mut self, datagram: &[u8]) -> bool {
        let datagram = trim_line_ending(datagram);
        if datagram.is_empty() {
            return true;
        }
        if datagram.len() > self.max_packet_len {
            return false;
        }

        if self.current_packet_len() + self.appended_len(datagram) > self.max_packet_len {
            self.finalize_current_packet();
        }

        if self.current_packet_len() > 0 {
            self.packets_buf.push(b'\n');
        }
        self.packets_buf.extend_from_slice(datagram);

        true
    }

    /// Returns a consuming iterator over all packets written so far, including the current one.
    ///
    /// The writer is empty once the iterator is dropped.
    pub fn packets(&mut self) -> Packets<'_> {
        self.finalize_current_packet();
        Packets::new(&mut self.packets_buf, &mut self.offsets)
    }
}

fn trim_line_ending(mut datagram: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = datagram {
        datagram = rest;
    }
    datagram
}

/// Iterator over all packets written by a `PacketWriter`.
pub(crate) struct Packets<'a> {
    packets_buf: ConsumingBufferSwap<'a, u8>,
    start: usize,
    offsets: Drain<'a, usize>,
}

impl<'a> Packets<'a> {
    fn new(packets_buf: &'a mut Vec<u8>, offsets: &'a mut Vec<usize>) -> Self {
        Self {
            packets_buf: ConsumingBufferSwap::new(packets_buf),
            start: 0,
            offsets: offsets.drain(..),
        }
    }

    /// Returns the next packet, or `None` if every packet has been consumed.
    pub fn next_packet(&mut self) -> Option<&[u8]> {
        let offset = self.offsets.next()?;

        let packet = &self.packets_buf[self.start..offset];
        self.start = offset;

        Some(packet)
    }
}

// Swaps the source buffer out for an empty one for as long as the packets are being consumed.
//
// The source is left empty immediately, so even if the drop logic never runs the writer starts over from a clean
// slate. When the drop logic does run, the original allocation is cleared and handed back for reuse.
struct ConsumingBufferSwap<'a, T> {
    source: &'a mut Vec<T>,
    original: Vec<T>,
}

impl<'a, T> ConsumingBufferSwap<'a, T> {
    fn new(source: &'a mut Vec<T>) -> Self {
        let original = std::mem::take(source);
        Self { source, original }
    }
}

impl<T> Drop for ConsumingBufferSwap<'_, T> {
    fn drop(&mut self) {
        self.original.clear();
        std::mem::swap(self.source, &mut self.original);
    }
}

impl<T> Deref for ConsumingBufferSwap<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.original
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use super::{PacketWriter, SMALLEST_VALID_DATAGRAM};

    const SMALLEST_VALID_DATAGRAM_LEN: usize = SMALLEST_VALID_DATAGRAM.len();

    fn collect_packets(writer: &mut PacketWriter) -> Vec<String> {
        let mut packets = writer.packets();
        let mut collected = Vec::new();
        while let Some(packet) = packets.next_packet() {
            collected.push(String::from_utf8(packet.to_vec()).unwrap());
        }
        collected
    }

    #[test]
    fn joins_datagrams_with_newlines() {
        let mut writer = PacketWriter::new(1472);
        assert!(writer.write(b"foo:1|c"));
        assert!(writer.write(b"bar:2|g\n"));
        assert!(writer.write(b"baz:3.5|ms|#host:abc"));

        assert_eq!(collect_packets(&mut writer), vec!["foo:1|c\nbar:2|g\nbaz:3.5|ms|#host:abc"]);
        assert!(writer.is_empty());
    }

    #[test]
    fn splits_when_next_datagram_would_overflow() {
        // Two 7 byte datagrams plus a separator fill a 15 byte packet exactly.
        let mut writer = PacketWriter::new(15);
        assert!(writer.write(b"foo:1|c"));
        assert!(!writer.would_overflow(b"bar:1|c"));
        assert!(writer.write(b"bar:1|c"));
        assert!(writer.would_overflow(b"baz:1|c"));
        assert!(writer.write(b"baz:1|c"));

        assert_eq!(collect_packets(&mut writer), vec!["foo:1|c\nbar:1|c", "baz:1|c"]);
    }

    #[test]
    fn rejects_oversized_datagram() {
        let mut writer = PacketWriter::new(8);
        assert!(writer.write(b"foo:1|c"));
        assert!(!writer.write(b"much_too_long:1|c"));
        assert!(writer.write(b"bar:1|c"));

        assert_eq!(collect_packets(&mut writer), vec!["foo:1|c", "bar:1|c"]);
    }

    #[test]
    fn ignores_empty_datagrams() {
        let mut writer = PacketWriter::new(64);
        assert!(writer.write(b""));
        assert!(writer.write(b"\n"));
        assert!(writer.is_empty());
        assert!(collect_packets(&mut writer).is_empty());
    }

    #[test]
    fn writer_is_reusable_after_taking_packets() {
        let mut writer = PacketWriter::new(64);
        assert!(writer.write(b"foo:1|c"));
        assert_eq!(collect_packets(&mut writer), vec!["foo:1|c"]);

        assert!(writer.write(b"bar:1|c"));
        assert_eq!(collect_packets(&mut writer), vec!["bar:1|c"]);
    }

    fn arb_datagram() -> impl Strategy<Value = String> {
        ("[a-z_.]{1,48}", 0u32..100_000, prop_oneof![Just("c"), Just("g"), Just("ms")])
            .prop_map(|(name, value, ty)| format!("{name}:{value}|{ty}"))
    }

    proptest! {
        #[test]
        fn property_test_gauntlet(
            packet_limit in SMALLEST_VALID_DATAGRAM_LEN..4096usize,
            inputs in arb_vec(arb_datagram(), 1..256),
        ) {
            let mut writer = PacketWriter::new(packet_limit);
            let mut accepted = Vec::new();
            let mut rejected = 0;

            for input in &inputs {
                if writer.write(input.as_bytes()) {
                    accepted.push(input.clone());
                } else {
                    prop_assert!(input.len() > packet_limit);
                    rejected += 1;
                }
            }

            let mut emitted = Vec::new();
            for packet in collect_packets(&mut writer) {
                prop_assert!(packet.len() <= packet_limit);
                prop_assert!(!packet.is_empty());
                emitted.extend(packet.split('\n').map(str::to_string));
            }

            prop_assert_eq!(accepted.len() + rejected, inputs.len());
            prop_assert_eq!(emitted, accepted);
        }
    }
}
