mod test_full_pipeline;
mod test_poller_lifecycle;
