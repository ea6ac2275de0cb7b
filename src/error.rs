//! Errors generated by nscensus.

error_chain! {
    // Wrappers for other errors.
    foreign_links {
        Io(::std::io::Error);
        Nix(::nix::Error);
    }

    // Internally defined errors.
    errors {
        // A namespace identity string failed to parse.
        InvalidNamespaceId(text: String) {
            description("not a valid namespace ID")
            display("not a valid namespace ID: {:?}", text)
        }

        // An identity string parsed, but not for the expected kind.
        InvalidKindNamespaceId(kind: &'static str, text: String) {
            description("not a valid namespace ID for this kind")
            display("not a valid {} namespace ID: {:?}", kind, text)
        }

        // A namespace identity is absent from a discovery result.
        UnknownNamespace(kind: &'static str, id: String) {
            description("namespace not present in the discovery result")
            display("unknown {} namespace {}", kind, id)
        }

        // A namespace reference could not be resolved to an open fd.
        NamespaceRef(reference: String) {
            description("cannot reference namespace")
            display("cannot reference namespace {}", reference)
        }

        // setns() into the referenced namespace failed.
        EnterNamespace(reference: String, err: ::nix::errno::Errno) {
            description("cannot enter namespace")
            display("cannot enter namespace {}: {}", reference, err)
        }

        // setns() back into a previously active namespace failed.
        RestoreNamespace(reference: String, err: ::nix::errno::Errno) {
            description("cannot switch back into namespace")
            display("cannot switch back into namespace {}: {}", reference, err)
        }

        // A failed switch-back left the thread inside foreign namespaces.
        TaintedThread {
            description("thread left inside foreign namespaces")
            display("thread left inside foreign namespaces and must not be reused")
        }
    }
}
