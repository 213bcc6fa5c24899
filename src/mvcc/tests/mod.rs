mod tests_pinning;
