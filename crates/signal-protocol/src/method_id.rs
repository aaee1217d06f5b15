//! Method name to wire id checksum.
//!
//! Request frames carry a numeric method id instead of the method name, so
//! every implementation of this protocol must derive ids the same way: the
//! standard CRC-32 over the UTF-8 bytes of the name. Two registries that
//! register the same name therefore always agree on the id, which is the
//! sole mechanism binding client and server method tables.

/// Compute the wire id for a method name.
#[must_use]
pub fn method_id(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_check_vector() {
        // Canonical CRC-32 check value.
        assert_eq!(method_id("123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(method_id("join"), method_id("join"));
        assert_ne!(method_id("join"), method_id("produce"));
        assert_ne!(method_id("join"), method_id("Join"));
    }

    #[test]
    fn test_collision_free_over_method_set() {
        let names = [
            "getRouterRtpCapabilities",
            "join",
            "createWebRtcTransport",
            "connectWebRtcTransport",
            "restartIce",
            "produce",
            "produceData",
            "pauseConsumer",
            "resumeConsumer",
            "requestConsumerKeyFrame",
            "changeDisplayName",
            "getTransportStats",
            "getProducerStats",
            "getConsumerStats",
            "getDataProducerStats",
            "getDataConsumerStats",
            "applyNetworkThrottle",
            "resetNetworkThrottle",
            "newConsumer",
            "newDataConsumer",
        ];

        let ids: HashSet<u32> = names.iter().map(|name| method_id(name)).collect();
        assert_eq!(ids.len(), names.len());
    }
}
