use fixture::Fixture;
